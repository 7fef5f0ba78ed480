use crate::model::ModelManager;
use crate::model::namespace::Namespace;
use crate::{Ctx, Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaMode {
    Inherit,
    Custom,
}

impl QuotaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaMode::Inherit => "inherit",
            QuotaMode::Custom => "custom",
        }
    }
}

/// Per-namespace byte budgets. `inherit` falls back to the server defaults;
/// `custom` uses the row's values (null = unlimited).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaPolicy {
    pub namespace_id: i64,
    pub mode: QuotaMode,
    pub public_quota_bytes: Option<i64>,
    pub private_quota_bytes: Option<i64>,
}

/// Resolved budgets for one namespace. `None` = unlimited.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveQuota {
    pub public_limit: Option<u64>,
    pub private_limit: Option<u64>,
}

pub struct QuotaBmc;

impl QuotaBmc {
    pub async fn get(_ctx: &Ctx, mm: &ModelManager, namespace_id: i64) -> Result<Option<QuotaPolicy>> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT namespace_id, mode, public_quota_bytes, private_quota_bytes
                 FROM quota_policies WHERE namespace_id = ?",
            )
            .await?;
        let mut rows = stmt.query([namespace_id]).await?;
        match rows.next().await? {
            Some(row) => {
                let mode_str: String = row.get(1)?;
                Ok(Some(QuotaPolicy {
                    namespace_id: row.get(0)?,
                    mode: if mode_str == "custom" {
                        QuotaMode::Custom
                    } else {
                        QuotaMode::Inherit
                    },
                    public_quota_bytes: row.get(2)?,
                    private_quota_bytes: row.get(3)?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn set(
        _ctx: &Ctx,
        mm: &ModelManager,
        policy: &QuotaPolicy,
    ) -> Result<()> {
        mm.db()
            .execute(
                "INSERT INTO quota_policies (namespace_id, mode, public_quota_bytes, private_quota_bytes)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (namespace_id) DO UPDATE SET
                   mode = excluded.mode,
                   public_quota_bytes = excluded.public_quota_bytes,
                   private_quota_bytes = excluded.private_quota_bytes",
                libsql::params![
                    policy.namespace_id,
                    policy.mode.as_str(),
                    policy.public_quota_bytes,
                    policy.private_quota_bytes
                ],
            )
            .await?;
        Ok(())
    }

    /// Resolves the effective budgets: custom policy wins, otherwise the
    /// server defaults (where 0 means unlimited).
    pub async fn effective(
        ctx: &Ctx,
        mm: &ModelManager,
        namespace: &Namespace,
    ) -> Result<EffectiveQuota> {
        let policy = Self::get(ctx, mm, namespace.id).await?;
        let defaults = &mm.app_config.quota;
        let default_public = (defaults.default_public_quota_bytes > 0)
            .then_some(defaults.default_public_quota_bytes);
        let default_private = (defaults.default_private_quota_bytes > 0)
            .then_some(defaults.default_private_quota_bytes);

        Ok(match policy {
            Some(p) if p.mode == QuotaMode::Custom => EffectiveQuota {
                public_limit: p.public_quota_bytes.map(|v| v.max(0) as u64),
                private_limit: p.private_quota_bytes.map(|v| v.max(0) as u64),
            },
            _ => EffectiveQuota {
                public_limit: default_public,
                private_limit: default_private,
            },
        })
    }

    /// Admission check for `delta` additional bytes in one of the pools.
    /// `projected = current + delta` must stay within the effective budget.
    pub fn admit(
        namespace: &Namespace,
        quota: &EffectiveQuota,
        private_pool: bool,
        delta: i64,
    ) -> Result<()> {
        if delta <= 0 {
            return Ok(());
        }
        let (current, limit) = if private_pool {
            (namespace.used_private_bytes, quota.private_limit)
        } else {
            (namespace.used_public_bytes, quota.public_limit)
        };
        if let Some(limit) = limit {
            let projected = current.max(0) as u64 + delta as u64;
            if projected > limit {
                return Err(Error::QuotaExceeded {
                    scope: namespace.name.clone(),
                    projected,
                    limit,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::namespace::NamespaceKind;

    fn test_namespace(used_public: i64) -> Namespace {
        Namespace {
            id: 1,
            name: "alice".to_string(),
            kind: NamespaceKind::User,
            owner_user_id: Some(1),
            used_public_bytes: used_public,
            used_private_bytes: 0,
        }
    }

    #[test]
    fn test_admit_within_budget() {
        let quota = EffectiveQuota {
            public_limit: Some(100),
            private_limit: None,
        };
        assert!(QuotaBmc::admit(&test_namespace(90), &quota, false, 10).is_ok());
    }

    #[test]
    fn test_admit_rejects_over_budget() {
        let quota = EffectiveQuota {
            public_limit: Some(100),
            private_limit: None,
        };
        let err = QuotaBmc::admit(&test_namespace(90), &quota, false, 20);
        assert!(matches!(err, Err(Error::QuotaExceeded { .. })));
    }

    #[test]
    fn test_admit_unlimited() {
        let quota = EffectiveQuota {
            public_limit: None,
            private_limit: None,
        };
        assert!(QuotaBmc::admit(&test_namespace(i64::MAX / 2), &quota, false, 1 << 40).is_ok());
    }

    #[test]
    fn test_admit_ignores_shrinking_writes() {
        let quota = EffectiveQuota {
            public_limit: Some(10),
            private_limit: None,
        };
        assert!(QuotaBmc::admit(&test_namespace(100), &quota, false, -50).is_ok());
    }
}
