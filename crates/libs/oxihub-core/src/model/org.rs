use crate::model::ModelManager;
use crate::model::user::validate_name;
use crate::{Ctx, Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrgRole {
    Member,
    Admin,
    SuperAdmin,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Member => "member",
            OrgRole::Admin => "admin",
            OrgRole::SuperAdmin => "super-admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "member" => Ok(OrgRole::Member),
            "admin" => Ok(OrgRole::Admin),
            "super-admin" => Ok(OrgRole::SuperAdmin),
            other => Err(Error::InvalidName(format!("role {other}"))),
        }
    }

    pub fn admits_writes(&self) -> bool {
        matches!(self, OrgRole::Admin | OrgRole::SuperAdmin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMember {
    pub user_id: i64,
    pub username: String,
    pub role: OrgRole,
}

pub struct OrgBmc;

impl OrgBmc {
    /// Creates an organization namespace; the creator becomes super-admin.
    pub async fn create(ctx: &Ctx, mm: &ModelManager, name: &str) -> Result<i64> {
        let user_id = ctx.user_id().ok_or(Error::Unauthenticated)?;
        validate_name(name)?;

        let taken = mm
            .db()
            .prepare("SELECT id FROM namespaces WHERE name = ?")
            .await?
            .query([name])
            .await?
            .next()
            .await?;
        if taken.is_some() {
            return Err(Error::NameTaken(name.to_string()));
        }

        let _write = mm.write_lock.lock().await;
        let tx = mm.db().transaction().await?;
        let mut rows = tx
            .query(
                "INSERT INTO namespaces (name, kind) VALUES (?, 'org') RETURNING id",
                [name],
            )
            .await?;
        let org_id = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => return Err(Error::StorageUnavailable),
        };
        tx.execute(
            "INSERT INTO org_members (org_namespace_id, user_id, role) VALUES (?, ?, 'super-admin')",
            libsql::params![org_id, user_id],
        )
        .await?;
        tx.commit().await?;
        Ok(org_id)
    }

    pub async fn role_of(mm: &ModelManager, org_namespace_id: i64, user_id: i64) -> Result<Option<OrgRole>> {
        let stmt = mm
            .db()
            .prepare("SELECT role FROM org_members WHERE org_namespace_id = ? AND user_id = ?")
            .await?;
        let mut rows = stmt.query([org_namespace_id, user_id]).await?;
        match rows.next().await? {
            Some(row) => {
                let role: String = row.get(0)?;
                Ok(Some(OrgRole::parse(&role)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_members(
        _ctx: &Ctx,
        mm: &ModelManager,
        org_namespace_id: i64,
    ) -> Result<Vec<OrgMember>> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT m.user_id, u.username, m.role
                 FROM org_members m JOIN users u ON u.id = m.user_id
                 WHERE m.org_namespace_id = ? ORDER BY u.username",
            )
            .await?;
        let mut rows = stmt.query([org_namespace_id]).await?;

        let mut members = Vec::new();
        while let Some(row) = rows.next().await? {
            let role: String = row.get(2)?;
            members.push(OrgMember {
                user_id: row.get(0)?,
                username: row.get(1)?,
                role: OrgRole::parse(&role)?,
            });
        }
        Ok(members)
    }

    /// Adds or re-roles a member. Role-matrix enforcement happens in the
    /// access gate before this is called.
    pub async fn upsert_member(
        mm: &ModelManager,
        org_namespace_id: i64,
        user_id: i64,
        role: OrgRole,
    ) -> Result<()> {
        mm.db()
            .execute(
                "INSERT INTO org_members (org_namespace_id, user_id, role) VALUES (?, ?, ?)
                 ON CONFLICT (org_namespace_id, user_id) DO UPDATE SET role = excluded.role",
                libsql::params![org_namespace_id, user_id, role.as_str()],
            )
            .await?;
        Ok(())
    }

    pub async fn remove_member(
        mm: &ModelManager,
        org_namespace_id: i64,
        user_id: i64,
    ) -> Result<()> {
        let affected = mm
            .db()
            .execute(
                "DELETE FROM org_members WHERE org_namespace_id = ? AND user_id = ?",
                [org_namespace_id, user_id],
            )
            .await?;
        if affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering_matches_privilege() {
        assert!(OrgRole::SuperAdmin > OrgRole::Admin);
        assert!(OrgRole::Admin > OrgRole::Member);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(OrgRole::parse("super-admin").ok(), Some(OrgRole::SuperAdmin));
        assert!(OrgRole::parse("root").is_err());
    }
}
