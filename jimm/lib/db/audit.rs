use chrono::{DateTime, Utc};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::JimmResult;

use super::Database;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One entry in the audit log.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEntry {
    /// Surrogate key.
    pub id: i64,

    /// When the audited operation ran.
    pub time: DateTime<Utc>,

    /// The user that performed the operation.
    pub username: String,

    /// The operation name.
    pub action: String,

    /// Whether the operation succeeded.
    pub success: bool,

    /// JSON parameters of the operation.
    pub params: String,
}

/// A filter over the audit log.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct AuditFilter {
    /// Only entries at or after this time.
    #[builder(default, setter(strip_option))]
    pub after: Option<DateTime<Utc>>,

    /// Only entries by this user.
    #[builder(default, setter(strip_option))]
    pub username: Option<String>,

    /// Only entries for this operation.
    #[builder(default, setter(strip_option))]
    pub action: Option<String>,

    /// Maximum number of entries returned.
    #[builder(default = 100)]
    pub limit: i64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Database {
    /// Appends an entry to the audit log.
    pub async fn add_audit_entry(
        &self,
        username: &str,
        action: &str,
        success: bool,
        params: &serde_json::Value,
    ) -> JimmResult<()> {
        sqlx::query(
            "INSERT INTO audit_log (time, username, action, success, params) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(self.now())
        .bind(username)
        .bind(action)
        .bind(success)
        .bind(params.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Queries the audit log, newest first.
    pub async fn audit_entries(&self, filter: &AuditFilter) -> JimmResult<Vec<AuditEntry>> {
        let mut sql = String::from("SELECT * FROM audit_log WHERE 1 = 1");
        if filter.after.is_some() {
            sql.push_str(" AND time >= ?");
        }
        if filter.username.is_some() {
            sql.push_str(" AND username = ?");
        }
        if filter.action.is_some() {
            sql.push_str(" AND action = ?");
        }
        sql.push_str(" ORDER BY time DESC, id DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, AuditEntry>(&sql);
        if let Some(after) = filter.after {
            query = query.bind(after);
        }
        if let Some(username) = &filter.username {
            query = query.bind(username);
        }
        if let Some(action) = &filter.action {
            query = query.bind(action);
        }
        let entries = query.bind(filter.limit).fetch_all(self.pool()).await?;
        Ok(entries)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
