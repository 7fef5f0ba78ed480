use crate::model::ModelManager;
use crate::store::Db;
use crate::store::tree_store::StorageKind;
use crate::{Ctx, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Mirror row of the latest committed entry per `(repo, path)`.
///
/// Git trees are the source of truth per branch; these rows exist so the
/// dedup oracle, the usage counters and GC never have to walk trees on the
/// hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub repo_id: i64,
    pub path: String,
    pub size: i64,
    pub content_sha256: String,
    pub storage_kind: StorageKind,
    pub commit_id: String,
    pub updated_at: NaiveDateTime,
}

pub struct FileEntryBmc;

impl FileEntryBmc {
    pub async fn get(
        _ctx: &Ctx,
        mm: &ModelManager,
        repo_id: i64,
        path: &str,
    ) -> Result<Option<FileRecord>> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT id, repo_id, path, size, content_sha256, storage_kind, commit_id, updated_at
                 FROM files WHERE repo_id = ? AND path = ?",
            )
            .await?;
        let mut rows = stmt.query(libsql::params![repo_id, path]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Dedup oracle: does the latest committed entry at `path` already carry
    /// exactly these bytes?
    pub async fn exists_with(
        mm: &ModelManager,
        repo_id: i64,
        path: &str,
        sha256: &str,
        size: i64,
    ) -> Result<bool> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT 1 FROM files
                 WHERE repo_id = ? AND path = ? AND content_sha256 = ? AND size = ?",
            )
            .await?;
        let mut rows = stmt
            .query(libsql::params![repo_id, path, sha256, size])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Upsert inside the commit transaction.
    pub async fn upsert_in(
        conn: &Db,
        repo_id: i64,
        path: &str,
        size: i64,
        sha256: &str,
        storage_kind: StorageKind,
        commit_id: &str,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO files (repo_id, path, size, content_sha256, storage_kind, commit_id, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, datetime('now'))
             ON CONFLICT (repo_id, path) DO UPDATE SET
               size = excluded.size,
               content_sha256 = excluded.content_sha256,
               storage_kind = excluded.storage_kind,
               commit_id = excluded.commit_id,
               updated_at = excluded.updated_at",
            libsql::params![repo_id, path, size, sha256, storage_kind.as_str(), commit_id],
        )
        .await?;
        Ok(())
    }

    /// Delete inside the commit transaction. Idempotent.
    pub async fn delete_in(conn: &Db, repo_id: i64, path: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM files WHERE repo_id = ? AND path = ?",
            libsql::params![repo_id, path],
        )
        .await?;
        Ok(())
    }

    /// All external oids currently referenced by any mirror row. Feeds GC's
    /// reachability cross-check.
    pub async fn referenced_external_oids(mm: &ModelManager) -> Result<Vec<String>> {
        let stmt = mm
            .db()
            .prepare("SELECT DISTINCT content_sha256 FROM files WHERE storage_kind = 'external'")
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut oids = Vec::new();
        while let Some(row) = rows.next().await? {
            oids.push(row.get(0)?);
        }
        Ok(oids)
    }
}

fn record_from_row(row: &libsql::Row) -> Result<FileRecord> {
    let storage_kind_str: String = row.get(5)?;
    let updated_at_str: String = row.get(7)?;
    Ok(FileRecord {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        path: row.get(2)?,
        size: row.get(3)?,
        content_sha256: row.get(4)?,
        storage_kind: if storage_kind_str == "external" {
            StorageKind::External
        } else {
            StorageKind::Inline
        },
        commit_id: row.get(6)?,
        updated_at: NaiveDateTime::parse_from_str(&updated_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
    })
}
