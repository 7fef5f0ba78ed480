//! Request context for authentication and authorization.
//!
//! The [`Ctx`] struct identifies the caller of every BMC method. It is
//! produced by the server's auth middleware (cookie session or bearer
//! token) and carried through the whole pipeline, so the access gate can
//! apply the role matrix without re-reading credentials.

/// The caller behind a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    /// No credentials presented. Allowed to read public repositories.
    Anonymous,
    /// An authenticated user.
    User {
        id: i64,
        username: String,
        /// Instance operators bypass namespace ownership checks.
        operator: bool,
    },
}

/// Request context containing caller identification.
///
/// # Examples
///
/// ```
/// use oxihub_core::ctx::Ctx;
///
/// let ctx = Ctx::anonymous();
/// assert!(ctx.user_id().is_none());
///
/// let ctx = Ctx::user(42, "alice", false);
/// assert_eq!(ctx.user_id(), Some(42));
/// assert_eq!(ctx.username(), Some("alice"));
/// ```
#[derive(Clone, Debug)]
pub struct Ctx {
    principal: Principal,
}

impl Ctx {
    /// Context for unauthenticated requests.
    pub fn anonymous() -> Self {
        Ctx {
            principal: Principal::Anonymous,
        }
    }

    /// Context for an authenticated user.
    pub fn user(id: i64, username: impl Into<String>, operator: bool) -> Self {
        Ctx {
            principal: Principal::User {
                id,
                username: username.into(),
                operator,
            },
        }
    }

    /// Root context for system-level operations (migrations, GC, tests).
    /// Carries operator rights and no namespace of its own.
    pub fn root_ctx() -> Self {
        Ctx {
            principal: Principal::User {
                id: 0,
                username: "system".to_string(),
                operator: true,
            },
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user_id(&self) -> Option<i64> {
        match &self.principal {
            Principal::User { id, .. } => Some(*id),
            Principal::Anonymous => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match &self.principal {
            Principal::User { username, .. } => Some(username.as_str()),
            Principal::Anonymous => None,
        }
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            &self.principal,
            Principal::User { operator: true, .. }
        )
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(&self.principal, Principal::Anonymous)
    }
}
