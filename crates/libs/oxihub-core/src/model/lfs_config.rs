use crate::model::ModelManager;
use crate::{Ctx, Result};
use serde::{Deserialize, Serialize};

/// Per-repository large-file policy. Null fields inherit server defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoLfsConfig {
    pub threshold_bytes: Option<i64>,
    pub keep_versions: Option<i64>,
    #[serde(default)]
    pub suffix_rules: Vec<String>,
}

/// Fully resolved policy for one repository.
#[derive(Debug, Clone)]
pub struct EffectiveLfs {
    pub threshold_bytes: u64,
    pub keep_versions: u32,
    pub suffix_rules: Vec<String>,
}

impl EffectiveLfs {
    /// Classification rule: external iff size reaches the threshold OR the
    /// path matches a suffix rule (regardless of size).
    pub fn is_external(&self, path: &str, size: u64) -> bool {
        size >= self.threshold_bytes || self.matches_suffix(path)
    }

    pub fn matches_suffix(&self, path: &str) -> bool {
        self.suffix_rules.iter().any(|s| path.ends_with(s.as_str()))
    }
}

pub struct LfsConfigBmc;

impl LfsConfigBmc {
    pub async fn get(_ctx: &Ctx, mm: &ModelManager, repo_id: i64) -> Result<Option<RepoLfsConfig>> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT threshold_bytes, keep_versions, suffix_rules
                 FROM lfs_configs WHERE repo_id = ?",
            )
            .await?;
        let mut rows = stmt.query([repo_id]).await?;
        match rows.next().await? {
            Some(row) => {
                let suffix_json: Option<String> = row.get(2)?;
                let suffix_rules = match suffix_json {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Vec::new(),
                };
                Ok(Some(RepoLfsConfig {
                    threshold_bytes: row.get(0)?,
                    keep_versions: row.get(1)?,
                    suffix_rules,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn set(
        _ctx: &Ctx,
        mm: &ModelManager,
        repo_id: i64,
        config: &RepoLfsConfig,
    ) -> Result<()> {
        let suffix_json = serde_json::to_string(&config.suffix_rules)?;
        mm.db()
            .execute(
                "INSERT INTO lfs_configs (repo_id, threshold_bytes, keep_versions, suffix_rules)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (repo_id) DO UPDATE SET
                   threshold_bytes = excluded.threshold_bytes,
                   keep_versions = excluded.keep_versions,
                   suffix_rules = excluded.suffix_rules",
                libsql::params![
                    repo_id,
                    config.threshold_bytes,
                    config.keep_versions,
                    suffix_json.as_str()
                ],
            )
            .await?;
        Ok(())
    }

    /// Resolves the effective policy: repo overrides where set, server
    /// defaults elsewhere.
    pub async fn effective(ctx: &Ctx, mm: &ModelManager, repo_id: i64) -> Result<EffectiveLfs> {
        let stored = Self::get(ctx, mm, repo_id).await?.unwrap_or_default();
        let defaults = &mm.app_config.lfs;
        Ok(EffectiveLfs {
            threshold_bytes: stored
                .threshold_bytes
                .map(|v| v.max(0) as u64)
                .unwrap_or(defaults.default_threshold_bytes),
            keep_versions: stored
                .keep_versions
                .map(|v| v.max(0) as u32)
                .unwrap_or(defaults.default_keep_versions),
            suffix_rules: stored.suffix_rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effective(threshold: u64, suffixes: &[&str]) -> EffectiveLfs {
        EffectiveLfs {
            threshold_bytes: threshold,
            keep_versions: 3,
            suffix_rules: suffixes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_threshold_boundary_is_external() {
        let lfs = effective(10, &[]);
        assert!(lfs.is_external("w.bin", 10));
        assert!(!lfs.is_external("w.bin", 9));
    }

    #[test]
    fn test_suffix_rule_forces_external() {
        let lfs = effective(1024, &[".safetensors"]);
        assert!(lfs.is_external("model.safetensors", 10));
        assert!(!lfs.is_external("model.json", 10));
    }
}
