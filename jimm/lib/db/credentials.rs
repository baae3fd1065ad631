use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::names::credential_path;
use crate::JimmResult;

use super::{db_error, not_found, Controller, Database};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A cloud credential, identified by its `(cloud, owner, name)` path.
#[derive(Debug, Clone, FromRow)]
pub struct CloudCredential {
    /// Surrogate key.
    pub id: i64,

    /// The cloud the credential authenticates against.
    pub cloud_id: i64,

    /// The cloud name.
    pub cloud_name: String,

    /// The owning user.
    pub owner_id: i64,

    /// The owning user's username.
    pub owner: String,

    /// The credential name, unique per `(cloud, owner)`.
    pub name: String,

    /// The authentication type, e.g. `userpass` or `access-key`.
    pub auth_type: String,

    /// JSON attribute map; empty when the secret store holds the
    /// attributes.
    pub attributes: String,

    /// Whether the attributes live in the secret store.
    pub attributes_in_store: bool,

    /// Whether the credential has been revoked.
    pub revoked: bool,

    /// Whether the credential last validated successfully, when known.
    pub valid: Option<bool>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// The parameters for storing a cloud credential.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewCredential {
    /// The cloud the credential authenticates against.
    pub cloud: String,

    /// The owning user's username.
    pub owner: String,

    /// The credential name.
    pub name: String,

    /// The authentication type.
    #[builder(default)]
    pub auth_type: String,

    /// The attribute map to store in the catalog; empty when the secret
    /// store holds the attributes.
    #[builder(default)]
    pub attributes: HashMap<String, String>,

    /// Whether the attributes live in the secret store.
    #[builder(default = false)]
    pub attributes_in_store: bool,

    /// Whether the credential is known valid.
    #[builder(default, setter(strip_option))]
    pub valid: Option<bool>,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const CREDENTIAL_COLUMNS: &str = r#"
    x.id, x.cloud_id, c.name AS cloud_name, x.owner_id, u.username AS owner,
    x.name, x.auth_type, x.attributes, x.attributes_in_store, x.revoked, x.valid,
    x.created_at, x.updated_at
"#;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CloudCredential {
    /// The `<cloud>/<owner>/<name>` path of the credential.
    pub fn path(&self) -> String {
        credential_path(&self.cloud_name, &self.owner, &self.name)
    }

    /// The attribute map stored in the catalog.
    pub fn attribute_map(&self) -> HashMap<String, String> {
        serde_json::from_str(&self.attributes).unwrap_or_default()
    }
}

impl Database {
    /// Stores a credential, updating it in place if the path already
    /// exists. The owner must match the user portion of the path and must
    /// already exist.
    pub async fn upsert_credential(
        &self,
        credential: &NewCredential,
    ) -> JimmResult<CloudCredential> {
        let cloud = self.get_cloud(&credential.cloud).await?;
        let owner = self.get_user(&credential.owner).await?;
        let now = self.now();
        let attributes = serde_json::to_string(&credential.attributes)?;
        sqlx::query(
            r#"
            INSERT INTO cloud_credentials (
                cloud_id, owner_id, name, auth_type, attributes,
                attributes_in_store, revoked, valid, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            ON CONFLICT (cloud_id, owner_id, name) DO UPDATE SET
                auth_type = excluded.auth_type,
                attributes = excluded.attributes,
                attributes_in_store = excluded.attributes_in_store,
                valid = excluded.valid,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(cloud.id)
        .bind(owner.id)
        .bind(&credential.name)
        .bind(&credential.auth_type)
        .bind(&attributes)
        .bind(credential.attributes_in_store)
        .bind(credential.valid)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error("credential", e))?;
        self.get_credential(&credential.cloud, &credential.owner, &credential.name)
            .await
    }

    /// Fetches the credential at the given path.
    pub async fn get_credential(
        &self,
        cloud: &str,
        owner: &str,
        name: &str,
    ) -> JimmResult<CloudCredential> {
        let sql = format!(
            r#"
            SELECT {} FROM cloud_credentials x
            JOIN clouds c ON c.id = x.cloud_id
            JOIN users u ON u.id = x.owner_id
            WHERE c.name = ? AND u.username = ? AND x.name = ?
            "#,
            CREDENTIAL_COLUMNS
        );
        sqlx::query_as::<_, CloudCredential>(&sql)
            .bind(cloud)
            .bind(owner)
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| not_found(format!("credential {}", credential_path(cloud, owner, name))))
    }

    /// Lists a user's credentials for a cloud.
    pub async fn user_credentials(
        &self,
        owner: &str,
        cloud: &str,
    ) -> JimmResult<Vec<CloudCredential>> {
        let sql = format!(
            r#"
            SELECT {} FROM cloud_credentials x
            JOIN clouds c ON c.id = x.cloud_id
            JOIN users u ON u.id = x.owner_id
            WHERE u.username = ? AND c.name = ?
            ORDER BY x.name
            "#,
            CREDENTIAL_COLUMNS
        );
        let credentials = sqlx::query_as::<_, CloudCredential>(&sql)
            .bind(owner)
            .bind(cloud)
            .fetch_all(self.pool())
            .await?;
        Ok(credentials)
    }

    /// Marks a credential revoked and clears its stored attributes.
    pub async fn set_credential_revoked(&self, credential_id: i64) -> JimmResult<()> {
        sqlx::query(
            r#"
            UPDATE cloud_credentials
            SET revoked = 1, attributes = '{}', valid = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(self.now())
        .bind(credential_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Deletes a credential outright. Fails with `BadRequest` while a
    /// model still references it.
    pub async fn delete_credential(&self, credential_id: i64) -> JimmResult<()> {
        sqlx::query("DELETE FROM cloud_credentials WHERE id = ?")
            .bind(credential_id)
            .execute(self.pool())
            .await
            .map_err(|e| db_error("credential", e))?;
        Ok(())
    }

    /// Records that a controller holds a copy of the credential.
    pub async fn add_credential_controller(
        &self,
        credential_id: i64,
        controller_id: i64,
    ) -> JimmResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO credential_controllers (cloud_credential_id, controller_id)
            VALUES (?, ?)
            "#,
        )
        .bind(credential_id)
        .bind(controller_id)
        .execute(self.pool())
        .await
        .map_err(|e| db_error("credential controller", e))?;
        Ok(())
    }

    /// Lists the controllers currently holding a credential.
    pub async fn credential_controllers(
        &self,
        credential_id: i64,
    ) -> JimmResult<Vec<Controller>> {
        let controllers = sqlx::query_as::<_, Controller>(
            r#"
            SELECT k.* FROM controllers k
            JOIN credential_controllers cc ON cc.controller_id = k.id
            WHERE cc.cloud_credential_id = ?
            ORDER BY k.name
            "#,
        )
        .bind(credential_id)
        .fetch_all(self.pool())
        .await?;
        Ok(controllers)
    }

    /// Marks every controller holding the credential as needing an update
    /// push.
    pub async fn set_credential_update_pending(&self, credential_id: i64) -> JimmResult<()> {
        sqlx::query(
            "UPDATE credential_controllers SET needs_update = 1 WHERE cloud_credential_id = ?",
        )
        .bind(credential_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Clears the pending-update marker for one controller after a
    /// successful push.
    pub async fn clear_credential_update(
        &self,
        credential_id: i64,
        controller_id: i64,
    ) -> JimmResult<()> {
        sqlx::query(
            r#"
            UPDATE credential_controllers SET needs_update = 0
            WHERE cloud_credential_id = ? AND controller_id = ?
            "#,
        )
        .bind(credential_id)
        .bind(controller_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Counts the models that reference the credential.
    pub async fn models_using_credential(&self, credential_id: i64) -> JimmResult<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM models WHERE cloud_credential_id = ?")
                .bind(credential_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count.0)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewController;

    async fn seeded() -> anyhow::Result<Database> {
        let db = Database::new_in_memory().await?;
        db.add_cloud("aws", "ec2").await?;
        db.upsert_user("alice@external", None).await?;
        Ok(db)
    }

    #[test_log::test(tokio::test)]
    async fn test_credential_round_trip() -> anyhow::Result<()> {
        let db = seeded().await?;

        let mut attrs = HashMap::new();
        attrs.insert("access-key".to_string(), "AKIA".to_string());
        let credential = db
            .upsert_credential(
                &NewCredential::builder()
                    .cloud("aws".to_string())
                    .owner("alice@external".to_string())
                    .name("default".to_string())
                    .auth_type("access-key".to_string())
                    .attributes(attrs.clone())
                    .valid(true)
                    .build(),
            )
            .await?;
        assert_eq!(credential.path(), "aws/alice@external/default");
        assert_eq!(credential.owner, "alice@external");
        assert_eq!(credential.attribute_map(), attrs);
        assert_eq!(credential.valid, Some(true));

        // Upserting the same path updates in place.
        let updated = db
            .upsert_credential(
                &NewCredential::builder()
                    .cloud("aws".to_string())
                    .owner("alice@external".to_string())
                    .name("default".to_string())
                    .auth_type("access-key".to_string())
                    .build(),
            )
            .await?;
        assert_eq!(updated.id, credential.id);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_credential_controller_tracking() -> anyhow::Result<()> {
        let db = seeded().await?;
        let credential = db
            .upsert_credential(
                &NewCredential::builder()
                    .cloud("aws".to_string())
                    .owner("alice@external".to_string())
                    .name("default".to_string())
                    .build(),
            )
            .await?;
        let controller = db
            .add_controller(
                &NewController::builder()
                    .name("c1".to_string())
                    .uuid("00000010-0000-0000-0000-000000000001".to_string())
                    .build(),
            )
            .await?;

        db.add_credential_controller(credential.id, controller.id).await?;
        db.add_credential_controller(credential.id, controller.id).await?;

        let holding = db.credential_controllers(credential.id).await?;
        assert_eq!(holding.len(), 1);
        assert_eq!(holding[0].name, "c1");

        db.set_credential_update_pending(credential.id).await?;
        db.clear_credential_update(credential.id, controller.id).await?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_revoked_credential_keeps_row() -> anyhow::Result<()> {
        let db = seeded().await?;
        let credential = db
            .upsert_credential(
                &NewCredential::builder()
                    .cloud("aws".to_string())
                    .owner("alice@external".to_string())
                    .name("default".to_string())
                    .valid(true)
                    .build(),
            )
            .await?;

        db.set_credential_revoked(credential.id).await?;
        let revoked = db
            .get_credential("aws", "alice@external", "default")
            .await?;
        assert!(revoked.revoked);
        assert_eq!(revoked.valid, None);
        Ok(())
    }
}
