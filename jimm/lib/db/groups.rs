use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::JimmResult;

use super::{db_error, not_found, Database};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A named collection of users. The numeric id is what relation tuples
/// reference, so renames never touch the graph.
#[derive(Debug, Clone, FromRow)]
pub struct Group {
    /// Monotonically increasing id; immutable once assigned.
    pub id: i64,

    /// The group name; unique and mutable.
    pub name: String,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Database {
    /// Creates a group with the given name.
    pub async fn add_group(&self, name: &str) -> JimmResult<Group> {
        let now = self.now();
        sqlx::query("INSERT INTO groups (name, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(now)
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(|e| db_error(&format!("group {}", name), e))?;
        self.get_group(name).await
    }

    /// Fetches the group with the given name.
    pub async fn get_group(&self, name: &str) -> JimmResult<Group> {
        sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| not_found(format!("group {}", name)))
    }

    /// Lists every group, ordered by name.
    pub async fn list_groups(&self) -> JimmResult<Vec<Group>> {
        let groups = sqlx::query_as::<_, Group>("SELECT * FROM groups ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        Ok(groups)
    }

    /// Renames a group. The id, and therefore every relation tuple, is
    /// unchanged.
    pub async fn rename_group(&self, name: &str, new_name: &str) -> JimmResult<Group> {
        let result = sqlx::query("UPDATE groups SET name = ?, updated_at = ? WHERE name = ?")
            .bind(new_name)
            .bind(self.now())
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(|e| db_error(&format!("group {}", new_name), e))?;
        if result.rows_affected() == 0 {
            return Err(not_found(format!("group {}", name)));
        }
        self.get_group(new_name).await
    }

    /// Deletes a group. The caller is responsible for cascading the
    /// relation tuples that mention it.
    pub async fn remove_group(&self, name: &str) -> JimmResult<Group> {
        let group = self.get_group(name).await?;
        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(group.id)
            .execute(self.pool())
            .await?;
        Ok(group)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
