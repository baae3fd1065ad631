use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::JimmResult;

use super::{db_error, not_found, Database};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A user known to jimm. Created lazily on first login and never deleted
/// while referenced.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    /// Surrogate key.
    pub id: i64,

    /// The identity-provider-scoped username, `local-part@domain`.
    pub username: String,

    /// The user's display name.
    pub display_name: String,

    /// Whether the user is a jimm-wide administrator.
    pub jimm_admin: bool,

    /// When the user last logged in.
    pub last_login: Option<DateTime<Utc>>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Database {
    /// Fetches the user with the given username.
    pub async fn get_user(&self, username: &str) -> JimmResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| not_found(format!("user {}", username)))
    }

    /// Creates the user if it does not exist, updating the display name
    /// when one is provided. Returns the stored row.
    pub async fn upsert_user(
        &self,
        username: &str,
        display_name: Option<&str>,
    ) -> JimmResult<User> {
        let now = self.now();
        sqlx::query(
            r#"
            INSERT INTO users (username, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (username) DO UPDATE SET
                display_name = CASE WHEN excluded.display_name != '' THEN excluded.display_name ELSE users.display_name END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(username)
        .bind(display_name.unwrap_or(""))
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error("user", e))?;
        self.get_user(username).await
    }

    /// Records a login by the user.
    pub async fn set_user_last_login(&self, username: &str) -> JimmResult<()> {
        let now = self.now();
        sqlx::query("UPDATE users SET last_login = ?, updated_at = ? WHERE username = ?")
            .bind(now)
            .bind(now)
            .bind(username)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Sets or clears the jimm-wide administrator flag.
    pub async fn set_user_jimm_admin(&self, username: &str, admin: bool) -> JimmResult<()> {
        let now = self.now();
        let result =
            sqlx::query("UPDATE users SET jimm_admin = ?, updated_at = ? WHERE username = ?")
                .bind(admin)
                .bind(now)
                .bind(username)
                .execute(self.pool())
                .await?;
        if result.rows_affected() == 0 {
            return Err(not_found(format!("user {}", username)));
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
