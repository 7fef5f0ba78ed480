use crate::model::ModelManager;
use crate::{Ctx, Error, Result};
use chrono::NaiveDateTime;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_operator: bool,
    pub created_at: NaiveDateTime,
}

/// Usernames double as namespace names, so they share the naming rules.
pub fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 96
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with(['-', '.'])
        && !name.ends_with(['-', '.']);
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Digest used for both passwords and token secrets: the server pepper plus
/// an optional per-record salt. Only the hex digest is ever stored.
pub(crate) fn hash_secret(pepper: &str, salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time equality over hex digests.
pub(crate) fn digest_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub(crate) fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub struct UserBmc;

impl UserBmc {
    /// Registers a user and creates the matching user namespace atomically.
    /// The very first registered user becomes the instance operator.
    pub async fn create(
        _ctx: &Ctx,
        mm: &ModelManager,
        username: &str,
        password: &str,
    ) -> Result<i64> {
        validate_name(username)?;
        if password.len() < 8 {
            return Err(Error::InvalidName("password too short".to_string()));
        }

        // Namespace names are globally unique across users and orgs.
        let existing = mm
            .db()
            .prepare("SELECT id FROM namespaces WHERE name = ?")
            .await?
            .query([username])
            .await?
            .next()
            .await?;
        if existing.is_some() {
            return Err(Error::NameTaken(username.to_string()));
        }

        let salt = random_hex(16);
        let hash = hash_secret(&mm.app_config.server.token_pepper, &salt, password);

        let _write = mm.write_lock.lock().await;
        let tx = mm.db().transaction().await?;
        let first_user = tx
            .query("SELECT COUNT(*) FROM users", ())
            .await?
            .next()
            .await?
            .map(|row| row.get::<i64>(0))
            .transpose()?
            .unwrap_or(0)
            == 0;

        let mut rows = tx
            .query(
                "INSERT INTO users (username, password_salt, password_hash, is_operator)
                 VALUES (?, ?, ?, ?) RETURNING id",
                libsql::params![username, salt.as_str(), hash.as_str(), first_user as i64],
            )
            .await?;
        let user_id = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => return Err(Error::StorageUnavailable),
        };

        tx.execute(
            "INSERT INTO namespaces (name, kind, owner_user_id) VALUES (?, 'user', ?)",
            libsql::params![username, user_id],
        )
        .await?;

        tx.commit().await?;
        Ok(user_id)
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<User> {
        let stmt = mm
            .db()
            .prepare("SELECT id, username, is_operator, created_at FROM users WHERE id = ?")
            .await?;
        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(user_from_row(&row)?),
            None => Err(Error::UserNotFound(format!("id {id}"))),
        }
    }

    pub async fn get_by_username(_ctx: &Ctx, mm: &ModelManager, username: &str) -> Result<User> {
        let stmt = mm
            .db()
            .prepare("SELECT id, username, is_operator, created_at FROM users WHERE username = ?")
            .await?;
        let mut rows = stmt.query([username]).await?;
        match rows.next().await? {
            Some(row) => Ok(user_from_row(&row)?),
            None => Err(Error::UserNotFound(username.to_string())),
        }
    }

    /// Verifies a password login. Wrong username and wrong password are
    /// indistinguishable to the caller.
    pub async fn authenticate_password(
        mm: &ModelManager,
        username: &str,
        password: &str,
    ) -> Result<User> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT id, username, is_operator, created_at, password_salt, password_hash
                 FROM users WHERE username = ?",
            )
            .await?;
        let mut rows = stmt.query([username]).await?;
        let row = rows.next().await?.ok_or(Error::InvalidCredentials)?;

        let salt: String = row.get(4)?;
        let stored: String = row.get(5)?;
        let presented = hash_secret(&mm.app_config.server.token_pepper, &salt, password);
        if !digest_eq(&stored, &presented) {
            return Err(Error::InvalidCredentials);
        }
        user_from_row(&row)
    }
}

fn user_from_row(row: &libsql::Row) -> Result<User> {
    let created_at_str: String = row.get(3)?;
    let created_at = NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_default();
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        is_operator: row.get::<i64>(2)? != 0,
        created_at,
    })
}
