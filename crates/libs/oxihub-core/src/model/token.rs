use crate::model::ModelManager;
use crate::model::user::{User, hash_secret, random_hex};
use crate::{Ctx, Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Prefix that makes hub tokens recognisable in logs and secret scanners.
const TOKEN_PREFIX: &str = "oxh_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: i64,
    pub user_id: i64,
    pub label: String,
    pub created_at: NaiveDateTime,
    pub last_used: Option<NaiveDateTime>,
    pub revoked: bool,
}

pub struct TokenBmc;

impl TokenBmc {
    /// Issues a token for the calling user. The secret is returned exactly
    /// once; only its digest is stored.
    pub async fn issue(ctx: &Ctx, mm: &ModelManager, label: &str) -> Result<(i64, String)> {
        let user_id = ctx.user_id().ok_or(Error::Unauthenticated)?;
        let secret = format!("{TOKEN_PREFIX}{}", random_hex(20));
        let digest = hash_secret(&mm.app_config.server.token_pepper, "", &secret);

        let mut rows = mm
            .db()
            .query(
                "INSERT INTO tokens (user_id, label, secret_hash) VALUES (?, ?, ?) RETURNING id",
                libsql::params![user_id, label, digest.as_str()],
            )
            .await?;
        let id = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => return Err(Error::StorageUnavailable),
        };
        Ok((id, secret))
    }

    /// Resolves a presented bearer secret to its user. The digest is the
    /// lookup key, so comparison never touches the plaintext.
    pub async fn authenticate(mm: &ModelManager, secret: &str) -> Result<User> {
        let digest = hash_secret(&mm.app_config.server.token_pepper, "", secret);
        let stmt = mm
            .db()
            .prepare(
                "SELECT t.id, t.revoked, u.id, u.username, u.is_operator, u.created_at
                 FROM tokens t JOIN users u ON u.id = t.user_id
                 WHERE t.secret_hash = ?",
            )
            .await?;
        let mut rows = stmt.query([digest.as_str()]).await?;
        let row = rows.next().await?.ok_or(Error::InvalidCredentials)?;

        let token_id: i64 = row.get(0)?;
        if row.get::<i64>(1)? != 0 {
            return Err(Error::RevokedToken);
        }

        mm.db()
            .execute(
                "UPDATE tokens SET last_used = datetime('now') WHERE id = ?",
                [token_id],
            )
            .await?;

        let created_at_str: String = row.get(5)?;
        Ok(User {
            id: row.get(2)?,
            username: row.get(3)?,
            is_operator: row.get::<i64>(4)? != 0,
            created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
                .unwrap_or_default(),
        })
    }

    pub async fn list_for_user(ctx: &Ctx, mm: &ModelManager) -> Result<Vec<Token>> {
        let user_id = ctx.user_id().ok_or(Error::Unauthenticated)?;
        let stmt = mm
            .db()
            .prepare(
                "SELECT id, user_id, label, created_at, last_used, revoked
                 FROM tokens WHERE user_id = ? AND revoked = 0 ORDER BY created_at DESC",
            )
            .await?;
        let mut rows = stmt.query([user_id]).await?;

        let mut tokens = Vec::new();
        while let Some(row) = rows.next().await? {
            tokens.push(token_from_row(&row)?);
        }
        Ok(tokens)
    }

    /// Revocation is soft: the row stays for audit, the secret stops working.
    pub async fn revoke(ctx: &Ctx, mm: &ModelManager, token_id: i64) -> Result<()> {
        let user_id = ctx.user_id().ok_or(Error::Unauthenticated)?;
        let affected = if ctx.is_operator() {
            mm.db()
                .execute("UPDATE tokens SET revoked = 1 WHERE id = ?", [token_id])
                .await?
        } else {
            mm.db()
                .execute(
                    "UPDATE tokens SET revoked = 1 WHERE id = ? AND user_id = ?",
                    [token_id, user_id],
                )
                .await?
        };
        if affected == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}

fn token_from_row(row: &libsql::Row) -> Result<Token> {
    let created_at_str: String = row.get(3)?;
    let last_used_str: Option<String> = row.get(4)?;
    Ok(Token {
        id: row.get(0)?,
        user_id: row.get(1)?,
        label: row.get(2)?,
        created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default(),
        last_used: last_used_str
            .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok()),
        revoked: row.get::<i64>(5)? != 0,
    })
}
