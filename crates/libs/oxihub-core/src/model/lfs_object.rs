use crate::model::ModelManager;
use crate::Result;

/// Verified content-addressed blobs, one row per sha256 across all repos.
/// A row here is the commit engine's proof that `object_not_ready` does not
/// apply to an oid.
pub struct LfsObjectBmc;

impl LfsObjectBmc {
    pub async fn exists(mm: &ModelManager, oid: &str) -> Result<bool> {
        let stmt = mm
            .db()
            .prepare("SELECT 1 FROM lfs_objects WHERE oid = ?")
            .await?;
        let mut rows = stmt.query([oid]).await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn get_size(mm: &ModelManager, oid: &str) -> Result<Option<i64>> {
        let stmt = mm
            .db()
            .prepare("SELECT size FROM lfs_objects WHERE oid = ?")
            .await?;
        let mut rows = stmt.query([oid]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Idempotent: verifying the same oid twice is the normal dedup path.
    pub async fn record(mm: &ModelManager, oid: &str, size: i64) -> Result<()> {
        mm.db()
            .execute(
                "INSERT INTO lfs_objects (oid, size) VALUES (?, ?)
                 ON CONFLICT (oid) DO NOTHING",
                libsql::params![oid, size],
            )
            .await?;
        Ok(())
    }

    pub async fn list_all(mm: &ModelManager) -> Result<Vec<(String, i64)>> {
        let stmt = mm
            .db()
            .prepare("SELECT oid, size, created_at FROM lfs_objects")
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push((row.get(0)?, row.get(1)?));
        }
        Ok(out)
    }

    /// Blobs older than `min_age_hours` and absent from `keep`: GC deletes
    /// these. Age-gating protects uploads verified but not yet committed.
    pub async fn reclaimable(
        mm: &ModelManager,
        min_age_hours: u64,
    ) -> Result<Vec<(String, i64)>> {
        let stmt = mm
            .db()
            .prepare(&format!(
                "SELECT oid, size FROM lfs_objects
                 WHERE created_at < datetime('now', '-{min_age_hours} hours')"
            ))
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push((row.get(0)?, row.get(1)?));
        }
        Ok(out)
    }

    pub async fn delete(mm: &ModelManager, oid: &str) -> Result<()> {
        mm.db()
            .execute("DELETE FROM lfs_objects WHERE oid = ?", [oid])
            .await?;
        Ok(())
    }
}
