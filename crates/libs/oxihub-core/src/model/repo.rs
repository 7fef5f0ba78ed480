use crate::model::ModelManager;
use crate::model::namespace::{Namespace, NamespaceBmc};
use crate::model::user::validate_name;
use crate::{Ctx, Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    Model,
    Dataset,
    Space,
}

impl RepoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoKind::Model => "model",
            RepoKind::Dataset => "dataset",
            RepoKind::Space => "space",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            RepoKind::Model => "models",
            RepoKind::Dataset => "datasets",
            RepoKind::Space => "spaces",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "model" => Ok(RepoKind::Model),
            "dataset" => Ok(RepoKind::Dataset),
            "space" => Ok(RepoKind::Space),
            other => Err(Error::InvalidName(format!("repo kind {other}"))),
        }
    }

    /// Parses the plural path segment used by the wire API (`models`, ...).
    pub fn parse_plural(s: &str) -> Result<Self> {
        match s {
            "models" => Ok(RepoKind::Model),
            "datasets" => Ok(RepoKind::Dataset),
            "spaces" => Ok(RepoKind::Space),
            other => Err(Error::InvalidName(format!("repo kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub kind: RepoKind,
    pub namespace_id: i64,
    pub namespace: String,
    pub name: String,
    pub private: bool,
    pub created_by: Option<i64>,
    pub used_bytes: i64,
    pub quota_bytes: Option<i64>,
    pub created_at: NaiveDateTime,
}

impl Repo {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

const SELECT_REPO: &str = "SELECT r.id, r.kind, r.namespace_id, n.name, r.name, r.private, \
     r.created_by, r.used_bytes, r.quota_bytes, r.created_at \
     FROM repos r JOIN namespaces n ON n.id = r.namespace_id";

pub struct RepoBmc;

impl RepoBmc {
    /// Creates the metadata row and the versioning root together. If root
    /// creation fails the row is removed again, so a repo never exists
    /// half-made.
    pub async fn create(
        ctx: &Ctx,
        mm: &ModelManager,
        kind: RepoKind,
        namespace_name: &str,
        name: &str,
        private: bool,
    ) -> Result<Repo> {
        validate_name(name)?;
        let namespace = NamespaceBmc::get_by_name(ctx, mm, namespace_name).await?;

        let mut rows = mm
            .db()
            .query(
                "INSERT INTO repos (kind, namespace_id, name, private, created_by)
                 VALUES (?, ?, ?, ?, ?) RETURNING id",
                libsql::params![
                    kind.as_str(),
                    namespace.id,
                    name,
                    private as i64,
                    ctx.user_id()
                ],
            )
            .await
            .map_err(|e| {
                if e.to_string().to_lowercase().contains("unique") {
                    Error::NameTaken(format!("{}/{}", namespace_name, name))
                } else {
                    Error::from(e)
                }
            })?;
        let repo_id = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => return Err(Error::StorageUnavailable),
        };

        if let Err(e) = mm.trees.create_root(repo_id) {
            let _ = mm
                .db()
                .execute("DELETE FROM repos WHERE id = ?", [repo_id])
                .await;
            return Err(e);
        }

        Self::get_by_id(ctx, mm, repo_id).await
    }

    pub async fn get(
        _ctx: &Ctx,
        mm: &ModelManager,
        kind: RepoKind,
        namespace_name: &str,
        name: &str,
    ) -> Result<Repo> {
        let stmt = mm
            .db()
            .prepare(&format!(
                "{SELECT_REPO} WHERE r.kind = ? AND n.name = ? AND r.name = ?"
            ))
            .await?;
        let mut rows = stmt
            .query(libsql::params![kind.as_str(), namespace_name, name])
            .await?;
        match rows.next().await? {
            Some(row) => repo_from_row(&row),
            None => Err(Error::RepoNotFound(format!(
                "{}/{}/{}",
                kind.as_str(),
                namespace_name,
                name
            ))),
        }
    }

    pub async fn get_by_id(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Repo> {
        let stmt = mm
            .db()
            .prepare(&format!("{SELECT_REPO} WHERE r.id = ?"))
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => repo_from_row(&row),
            None => Err(Error::RepoNotFound(format!("id {id}"))),
        }
    }

    pub async fn list_for_namespace(
        _ctx: &Ctx,
        mm: &ModelManager,
        namespace_name: &str,
        kind: Option<RepoKind>,
    ) -> Result<Vec<Repo>> {
        let mut sql = format!("{SELECT_REPO} WHERE n.name = ?");
        if kind.is_some() {
            sql.push_str(" AND r.kind = ?");
        }
        sql.push_str(" ORDER BY r.created_at DESC");
        let stmt = mm.db().prepare(&sql).await?;

        let mut rows = match kind {
            Some(k) => {
                stmt.query(libsql::params![namespace_name, k.as_str()])
                    .await?
            }
            None => stmt.query([namespace_name]).await?,
        };

        let mut repos = Vec::new();
        while let Some(row) = rows.next().await? {
            repos.push(repo_from_row(&row)?);
        }
        Ok(repos)
    }

    /// Every repository on the instance. GC uses this to build the reserved
    /// blob set; nothing user-facing should.
    pub async fn list_all(mm: &ModelManager) -> Result<Vec<Repo>> {
        let stmt = mm.db().prepare(SELECT_REPO).await?;
        let mut rows = stmt.query(()).await?;
        let mut repos = Vec::new();
        while let Some(row) = rows.next().await? {
            repos.push(repo_from_row(&row)?);
        }
        Ok(repos)
    }

    /// Removes the repository from the logical view. Metadata rows and the
    /// versioning root go now; physical blobs are reclaimed later by GC.
    pub async fn delete(ctx: &Ctx, mm: &ModelManager, repo: &Repo) -> Result<()> {
        let _write = mm.write_lock.lock().await;
        let tx = mm.db().transaction().await?;
        tx.execute("DELETE FROM files WHERE repo_id = ?", [repo.id])
            .await?;
        tx.execute("DELETE FROM staging_uploads WHERE repo_id = ?", [repo.id])
            .await?;
        tx.execute("DELETE FROM lfs_configs WHERE repo_id = ?", [repo.id])
            .await?;
        let column = if repo.private {
            "used_private_bytes"
        } else {
            "used_public_bytes"
        };
        tx.execute(
            &format!("UPDATE namespaces SET {column} = MAX(0, {column} - ?) WHERE id = ?"),
            libsql::params![repo.used_bytes, repo.namespace_id],
        )
        .await?;
        tx.execute("DELETE FROM repos WHERE id = ?", [repo.id])
            .await?;
        tx.commit().await?;

        mm.trees.drop_root(repo.id).await?;
        tracing::info!(repo = %repo.full_name(), by = ?ctx.user_id(), "deleted repository");
        Ok(())
    }

    /// Visibility change is an administrative operation: it also moves the
    /// repo's bytes between the namespace's public and private pools.
    pub async fn set_visibility(
        _ctx: &Ctx,
        mm: &ModelManager,
        repo: &Repo,
        private: bool,
    ) -> Result<()> {
        if repo.private == private {
            return Ok(());
        }
        let _write = mm.write_lock.lock().await;
        let tx = mm.db().transaction().await?;
        tx.execute(
            "UPDATE repos SET private = ? WHERE id = ?",
            libsql::params![private as i64, repo.id],
        )
        .await?;
        NamespaceBmc::move_usage(&tx, repo.namespace_id, repo.used_bytes, private).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_quota_bytes(
        _ctx: &Ctx,
        mm: &ModelManager,
        repo_id: i64,
        quota_bytes: Option<i64>,
    ) -> Result<()> {
        mm.db()
            .execute(
                "UPDATE repos SET quota_bytes = ? WHERE id = ?",
                libsql::params![quota_bytes, repo_id],
            )
            .await?;
        Ok(())
    }

    pub async fn namespace_of(ctx: &Ctx, mm: &ModelManager, repo: &Repo) -> Result<Namespace> {
        NamespaceBmc::get(ctx, mm, repo.namespace_id).await
    }
}

fn repo_from_row(row: &libsql::Row) -> Result<Repo> {
    let kind_str: String = row.get(1)?;
    let created_at_str: String = row.get(9)?;
    Ok(Repo {
        id: row.get(0)?,
        kind: RepoKind::parse(&kind_str)?,
        namespace_id: row.get(2)?,
        namespace: row.get(3)?,
        name: row.get(4)?,
        private: row.get::<i64>(5)? != 0,
        created_by: row.get(6)?,
        used_bytes: row.get(7)?,
        quota_bytes: row.get(8)?,
        created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
    })
}
