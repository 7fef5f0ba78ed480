use crate::model::ModelManager;
use crate::store::Db;
use crate::{Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Bookkeeping row for an in-flight upload. Basic uploads carry no
/// `upload_id`; multipart ones do, so the janitor can abort orphans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingRecord {
    pub id: i64,
    pub repo_id: i64,
    pub oid: String,
    pub size: i64,
    pub upload_id: Option<String>,
    pub state: StagingState,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingState {
    Pending,
    Complete,
}

impl StagingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingState::Pending => "pending",
            StagingState::Complete => "complete",
        }
    }
}

pub struct StagingBmc;

impl StagingBmc {
    pub async fn create(
        mm: &ModelManager,
        repo_id: i64,
        oid: &str,
        size: i64,
        upload_id: Option<&str>,
    ) -> Result<i64> {
        let mut rows = mm
            .db()
            .query(
                "INSERT INTO staging_uploads (repo_id, oid, size, upload_id) VALUES (?, ?, ?, ?)
                 RETURNING id",
                libsql::params![repo_id, oid, size, upload_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(Error::StorageUnavailable),
        }
    }

    pub async fn find_pending(mm: &ModelManager, oid: &str) -> Result<Vec<StagingRecord>> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT id, repo_id, oid, size, upload_id, state, created_at
                 FROM staging_uploads WHERE oid = ? AND state = 'pending'",
            )
            .await?;
        let mut rows = stmt.query([oid]).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(record_from_row(&row)?);
        }
        Ok(records)
    }

    /// Marks every staging row for `oid` complete. Used standalone by the
    /// verify endpoint and inside the commit transaction via `conn`.
    pub async fn close_for_oid(conn: &Db, oid: &str) -> Result<()> {
        conn.execute(
            "UPDATE staging_uploads SET state = 'complete' WHERE oid = ? AND state = 'pending'",
            [oid],
        )
        .await?;
        Ok(())
    }

    /// Pending rows older than the staging TTL; the janitor aborts and
    /// deletes them.
    pub async fn sweep_older_than(
        mm: &ModelManager,
        ttl_hours: u64,
    ) -> Result<Vec<StagingRecord>> {
        let stmt = mm
            .db()
            .prepare(&format!(
                "SELECT id, repo_id, oid, size, upload_id, state, created_at
                 FROM staging_uploads
                 WHERE state = 'pending' AND created_at < datetime('now', '-{ttl_hours} hours')"
            ))
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(record_from_row(&row)?);
        }
        Ok(records)
    }

    pub async fn delete(mm: &ModelManager, id: i64) -> Result<()> {
        mm.db()
            .execute("DELETE FROM staging_uploads WHERE id = ?", [id])
            .await?;
        Ok(())
    }

    /// Completed rows have served their purpose once the commit lands.
    pub async fn purge_complete(mm: &ModelManager) -> Result<u64> {
        Ok(mm
            .db()
            .execute("DELETE FROM staging_uploads WHERE state = 'complete'", ())
            .await?)
    }
}

fn record_from_row(row: &libsql::Row) -> Result<StagingRecord> {
    let state_str: String = row.get(5)?;
    let created_at_str: String = row.get(6)?;
    Ok(StagingRecord {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        oid: row.get(2)?,
        size: row.get(3)?,
        upload_id: row.get(4)?,
        state: if state_str == "complete" {
            StagingState::Complete
        } else {
            StagingState::Pending
        },
        created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
    })
}
