//! Authorization matrix and quota admission control.
//!
//! One gate, two concerns. Authorization is namespace-scoped: user
//! namespaces admit only their owner (and instance operators), org
//! namespaces admit by membership role. Quota admission compares
//! `projected = current + delta` against the effective budgets before any
//! physical write is authorised.

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::namespace::{Namespace, NamespaceBmc, NamespaceKind};
use crate::model::org::{OrgBmc, OrgRole};
use crate::model::quota::QuotaBmc;
use crate::model::repo::Repo;
use crate::{Error, Result};

/// What the caller wants to do with a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoAction {
    Read,
    Write,
    Settings,
}

/// Applies the role matrix for `action` on `repo`.
///
/// | action | public | private non-member | member | admin+ |
/// |---|---|---|---|---|
/// | read | allow | deny | allow | allow |
/// | write | deny* | deny | deny* | allow |
/// | settings | deny | deny | deny | allow |
///
/// (*) own-namespace writes and creator-member writes are allowed.
pub async fn authorize_repo(
    ctx: &Ctx,
    mm: &ModelManager,
    repo: &Repo,
    action: RepoAction,
) -> Result<()> {
    if ctx.is_operator() {
        return Ok(());
    }

    let namespace = NamespaceBmc::get(ctx, mm, repo.namespace_id).await?;

    if action == RepoAction::Read && !repo.private {
        return Ok(());
    }

    // Everything beyond public reads needs a principal.
    let user_id = match ctx.user_id() {
        Some(id) => id,
        None => return Err(Error::Unauthenticated),
    };

    match namespace.kind {
        NamespaceKind::User => {
            if ctx.username() == Some(namespace.name.as_str()) {
                Ok(())
            } else {
                Err(Error::Forbidden)
            }
        }
        NamespaceKind::Org => {
            let role = OrgBmc::role_of(mm, namespace.id, user_id).await?;
            let allowed = match (action, role) {
                (_, None) => false,
                (RepoAction::Read, Some(_)) => true,
                (RepoAction::Write, Some(role)) => {
                    role.admits_writes() || repo.created_by == Some(user_id)
                }
                (RepoAction::Settings, Some(role)) => role.admits_writes(),
            };
            if allowed { Ok(()) } else { Err(Error::Forbidden) }
        }
    }
}

/// Gate for creating a repository inside `namespace`: the namespace owner,
/// or any org member (the creator keeps write access to what they created).
pub async fn authorize_repo_create(
    ctx: &Ctx,
    mm: &ModelManager,
    namespace: &Namespace,
) -> Result<()> {
    if ctx.is_operator() {
        return Ok(());
    }
    let user_id = ctx.user_id().ok_or(Error::Unauthenticated)?;

    match namespace.kind {
        NamespaceKind::User => {
            if ctx.username() == Some(namespace.name.as_str()) {
                Ok(())
            } else {
                Err(Error::Forbidden)
            }
        }
        NamespaceKind::Org => match OrgBmc::role_of(mm, namespace.id, user_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::Forbidden),
        },
    }
}

/// Gate for namespace administration: quota edits, org settings. User
/// namespaces admit their owner; orgs admit admin and super-admin.
pub async fn authorize_namespace_admin(
    ctx: &Ctx,
    mm: &ModelManager,
    namespace: &Namespace,
) -> Result<()> {
    if ctx.is_operator() {
        return Ok(());
    }
    let user_id = ctx.user_id().ok_or(Error::Unauthenticated)?;

    match namespace.kind {
        NamespaceKind::User => {
            if ctx.username() == Some(namespace.name.as_str()) {
                Ok(())
            } else {
                Err(Error::Forbidden)
            }
        }
        NamespaceKind::Org => match OrgBmc::role_of(mm, namespace.id, user_id).await? {
            Some(role) if role.admits_writes() => Ok(()),
            Some(_) | None => Err(Error::Forbidden),
        },
    }
}

/// Gate for membership changes. Admins manage members, but anything that
/// touches a super-admin (granting or removing the role) needs a
/// super-admin caller.
pub async fn authorize_member_change(
    ctx: &Ctx,
    mm: &ModelManager,
    org: &Namespace,
    touches_super_admin: bool,
) -> Result<()> {
    if ctx.is_operator() {
        return Ok(());
    }
    let user_id = ctx.user_id().ok_or(Error::Unauthenticated)?;
    if org.kind != NamespaceKind::Org {
        return Err(Error::Forbidden);
    }

    match OrgBmc::role_of(mm, org.id, user_id).await? {
        Some(OrgRole::SuperAdmin) => Ok(()),
        Some(OrgRole::Admin) if !touches_super_admin => Ok(()),
        _ => Err(Error::Forbidden),
    }
}

/// Quota admission for `delta` more bytes in `repo`. Checked twice per the
/// protocol: advisory at preupload (claimed sizes), authoritative at commit.
/// The repo-level budget applies when it is stricter than the namespace one.
pub async fn admit_quota(ctx: &Ctx, mm: &ModelManager, repo: &Repo, delta: i64) -> Result<()> {
    if delta <= 0 {
        return Ok(());
    }

    if let Some(repo_limit) = repo.quota_bytes {
        let projected = repo.used_bytes.max(0) as u64 + delta as u64;
        if projected > repo_limit.max(0) as u64 {
            return Err(Error::QuotaExceeded {
                scope: repo.full_name(),
                projected,
                limit: repo_limit.max(0) as u64,
            });
        }
    }

    let namespace = NamespaceBmc::get(ctx, mm, repo.namespace_id).await?;
    let quota = QuotaBmc::effective(ctx, mm, &namespace).await?;
    QuotaBmc::admit(&namespace, &quota, repo.private, delta)
}
