use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::JimmResult;

use super::{db_error, not_found, Database};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A cloud known to jimm.
#[derive(Debug, Clone, FromRow)]
pub struct Cloud {
    /// Surrogate key.
    pub id: i64,

    /// The cloud name, unique across jimm.
    pub name: String,

    /// The provider type, e.g. `ec2` or `kubernetes`.
    pub provider_type: String,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// A region of a cloud.
#[derive(Debug, Clone, FromRow)]
pub struct CloudRegion {
    /// Surrogate key.
    pub id: i64,

    /// The owning cloud.
    pub cloud_id: i64,

    /// The owning cloud's name.
    pub cloud_name: String,

    /// The region name, unique within its cloud.
    pub name: String,
}

/// A user's access entry on a cloud.
#[derive(Debug, Clone, FromRow)]
pub struct CloudAccessEntry {
    /// The cloud the entry is on.
    pub cloud_id: i64,

    /// The user holding the access.
    pub username: String,

    /// The access level.
    pub access: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Database {
    /// Creates a cloud.
    pub async fn add_cloud(&self, name: &str, provider_type: &str) -> JimmResult<Cloud> {
        let now = self.now();
        sqlx::query(
            "INSERT INTO clouds (name, provider_type, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(provider_type)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error(&format!("cloud {}", name), e))?;
        self.get_cloud(name).await
    }

    /// Fetches the cloud with the given name.
    pub async fn get_cloud(&self, name: &str) -> JimmResult<Cloud> {
        sqlx::query_as::<_, Cloud>("SELECT * FROM clouds WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| not_found(format!("cloud {}", name)))
    }

    /// Creates a region of a cloud.
    pub async fn add_cloud_region(&self, cloud_name: &str, name: &str) -> JimmResult<CloudRegion> {
        let cloud = self.get_cloud(cloud_name).await?;
        let now = self.now();
        sqlx::query(
            "INSERT INTO cloud_regions (cloud_id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(cloud.id)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error(&format!("cloud region {}/{}", cloud_name, name), e))?;
        self.get_cloud_region(cloud_name, name).await
    }

    /// Fetches one region of a cloud.
    pub async fn get_cloud_region(
        &self,
        cloud_name: &str,
        name: &str,
    ) -> JimmResult<CloudRegion> {
        sqlx::query_as::<_, CloudRegion>(
            r#"
            SELECT r.id, r.cloud_id, c.name AS cloud_name, r.name
            FROM cloud_regions r
            JOIN clouds c ON c.id = r.cloud_id
            WHERE c.name = ? AND r.name = ?
            "#,
        )
        .bind(cloud_name)
        .bind(name)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| not_found(format!("cloud region {}/{}", cloud_name, name)))
    }

    /// Lists every region of a cloud.
    pub async fn cloud_regions(&self, cloud_name: &str) -> JimmResult<Vec<CloudRegion>> {
        let regions = sqlx::query_as::<_, CloudRegion>(
            r#"
            SELECT r.id, r.cloud_id, c.name AS cloud_name, r.name
            FROM cloud_regions r
            JOIN clouds c ON c.id = r.cloud_id
            WHERE c.name = ?
            ORDER BY r.name
            "#,
        )
        .bind(cloud_name)
        .fetch_all(self.pool())
        .await?;
        Ok(regions)
    }

    /// Records (or updates) a user's access entry on a cloud.
    pub async fn set_cloud_access(
        &self,
        cloud_name: &str,
        username: &str,
        access: &str,
    ) -> JimmResult<()> {
        let cloud = self.get_cloud(cloud_name).await?;
        let user = self.get_user(username).await?;
        sqlx::query(
            r#"
            INSERT INTO cloud_access (cloud_id, user_id, access)
            VALUES (?, ?, ?)
            ON CONFLICT (cloud_id, user_id) DO UPDATE SET access = excluded.access
            "#,
        )
        .bind(cloud.id)
        .bind(user.id)
        .bind(access)
        .execute(self.pool())
        .await
        .map_err(|e| db_error("cloud access", e))?;
        Ok(())
    }

    /// Lists the access entries on a cloud.
    pub async fn cloud_access_entries(
        &self,
        cloud_name: &str,
    ) -> JimmResult<Vec<CloudAccessEntry>> {
        let entries = sqlx::query_as::<_, CloudAccessEntry>(
            r#"
            SELECT a.cloud_id, u.username, a.access
            FROM cloud_access a
            JOIN clouds c ON c.id = a.cloud_id
            JOIN users u ON u.id = a.user_id
            WHERE c.name = ?
            ORDER BY u.username
            "#,
        )
        .bind(cloud_name)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
