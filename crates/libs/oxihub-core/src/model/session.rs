use crate::model::ModelManager;
use crate::model::user::User;
use crate::{Error, Result};
use chrono::NaiveDateTime;
use uuid::Uuid;

/// Cookie sessions live for a week; expired rows are ignored on read and
/// cleaned up opportunistically on login.
const SESSION_DAYS: i64 = 7;

pub struct SessionBmc;

impl SessionBmc {
    pub async fn create(mm: &ModelManager, user_id: i64) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        mm.db()
            .execute(
                &format!(
                    "INSERT INTO sessions (id, user_id, expires_at)
                     VALUES (?, ?, datetime('now', '+{SESSION_DAYS} days'))"
                ),
                libsql::params![id.as_str(), user_id],
            )
            .await?;
        // Opportunistic cleanup keeps the table small.
        let _ = mm
            .db()
            .execute("DELETE FROM sessions WHERE expires_at < datetime('now')", ())
            .await;
        Ok(id)
    }

    pub async fn authenticate(mm: &ModelManager, session_id: &str) -> Result<User> {
        let stmt = mm
            .db()
            .prepare(
                "SELECT u.id, u.username, u.is_operator, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.id = ? AND s.expires_at >= datetime('now')",
            )
            .await?;
        let mut rows = stmt.query([session_id]).await?;
        let row = rows.next().await?.ok_or(Error::InvalidCredentials)?;

        let created_at_str: String = row.get(3)?;
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            is_operator: row.get::<i64>(2)? != 0,
            created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
                .unwrap_or_default(),
        })
    }

    pub async fn delete(mm: &ModelManager, session_id: &str) -> Result<()> {
        mm.db()
            .execute("DELETE FROM sessions WHERE id = ?", [session_id])
            .await?;
        Ok(())
    }
}
