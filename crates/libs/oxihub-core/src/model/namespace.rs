use crate::model::ModelManager;
use crate::store::Db;
use crate::{Ctx, Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    User,
    Org,
}

impl NamespaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceKind::User => "user",
            NamespaceKind::Org => "org",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i64,
    pub name: String,
    pub kind: NamespaceKind,
    pub owner_user_id: Option<i64>,
    pub used_public_bytes: i64,
    pub used_private_bytes: i64,
}

pub struct NamespaceBmc;

impl NamespaceBmc {
    pub async fn get_by_name(_ctx: &Ctx, mm: &ModelManager, name: &str) -> Result<Namespace> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT id, name, kind, owner_user_id, used_public_bytes, used_private_bytes
                 FROM namespaces WHERE name = ?",
            )
            .await?;
        let mut rows = stmt.query([name]).await?;
        match rows.next().await? {
            Some(row) => namespace_from_row(&row),
            None => Err(Error::NamespaceNotFound(name.to_string())),
        }
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Namespace> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT id, name, kind, owner_user_id, used_public_bytes, used_private_bytes
                 FROM namespaces WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => namespace_from_row(&row),
            None => Err(Error::NamespaceNotFound(format!("id {id}"))),
        }
    }

    /// Adds `delta` (may be negative) to the pool matching `private`.
    /// Takes a connection so it can join the commit transaction.
    pub async fn add_usage(conn: &Db, namespace_id: i64, private: bool, delta: i64) -> Result<()> {
        let column = if private {
            "used_private_bytes"
        } else {
            "used_public_bytes"
        };
        conn.execute(
            &format!(
                "UPDATE namespaces SET {column} = MAX(0, {column} + ?) WHERE id = ?"
            ),
            libsql::params![delta, namespace_id],
        )
        .await?;
        Ok(())
    }

    /// Moves a repository's bytes between the public and private pools when
    /// its visibility flips.
    pub async fn move_usage(
        conn: &Db,
        namespace_id: i64,
        bytes: i64,
        now_private: bool,
    ) -> Result<()> {
        Self::add_usage(conn, namespace_id, !now_private, -bytes).await?;
        Self::add_usage(conn, namespace_id, now_private, bytes).await
    }
}

fn namespace_from_row(row: &libsql::Row) -> Result<Namespace> {
    let kind_str: String = row.get(2)?;
    let kind = match kind_str.as_str() {
        "org" => NamespaceKind::Org,
        _ => NamespaceKind::User,
    };
    Ok(Namespace {
        id: row.get(0)?,
        name: row.get(1)?,
        kind,
        owner_user_id: row.get(3)?,
        used_public_bytes: row.get(4)?,
        used_private_bytes: row.get(5)?,
    })
}
