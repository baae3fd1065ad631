use chrono::{DateTime, Utc};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::JimmResult;

use super::{db_error, not_found, Database};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A model hosted on one of the backing controllers, joined with the names
/// of everything it references.
#[derive(Debug, Clone, FromRow)]
pub struct Model {
    /// Surrogate key.
    pub id: i64,

    /// The model name, unique per owner.
    pub name: String,

    /// The model uuid; absent until the hosting controller reports the
    /// created model.
    pub uuid: Option<String>,

    /// The owning user.
    pub owner_id: i64,

    /// The owning user's username.
    pub owner: String,

    /// The hosting controller.
    pub controller_id: i64,

    /// The hosting controller's name.
    pub controller_name: String,

    /// The hosting controller's uuid.
    pub controller_uuid: String,

    /// The cloud region the model runs in.
    pub cloud_region_id: i64,

    /// The cloud name.
    pub cloud_name: String,

    /// The region name.
    pub region_name: String,

    /// The credential the model deploys with.
    pub cloud_credential_id: i64,

    /// The credential name.
    pub credential_name: String,

    /// The life status: alive, dying or dead.
    pub life: String,

    /// The current status kind.
    pub status: String,

    /// The current status message.
    pub status_info: String,

    /// When the status last changed.
    pub status_since: Option<DateTime<Utc>>,

    /// The agent version reported with the status.
    pub status_version: String,

    /// Machines in the model, per the last summary.
    pub machine_count: i64,

    /// Cores in the model, per the last summary.
    pub core_count: i64,

    /// Units in the model, per the last summary.
    pub unit_count: i64,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// The skeletal model row persisted before the hosting controller is asked
/// to create the model.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewModel {
    /// The model name.
    pub name: String,

    /// The owning user's username.
    pub owner: String,

    /// The chosen controller.
    pub controller_id: i64,

    /// The chosen cloud region.
    pub cloud_region_id: i64,

    /// The chosen credential.
    pub cloud_credential_id: i64,
}

/// A status update for a model.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ModelStatusUpdate {
    /// The status kind.
    #[builder(default)]
    pub status: String,

    /// The status message.
    #[builder(default)]
    pub info: String,

    /// When the status changed.
    #[builder(default, setter(strip_option))]
    pub since: Option<DateTime<Utc>>,

    /// The agent version.
    #[builder(default)]
    pub version: String,
}

/// A machine in a model.
#[derive(Debug, Clone, FromRow)]
pub struct Machine {
    /// Surrogate key.
    pub id: i64,

    /// The owning model.
    pub model_id: i64,

    /// The machine id within the model.
    pub machine_id: String,

    /// The machine display name.
    pub display_name: String,

    /// The cloud instance id.
    pub instance_id: String,

    /// The instance status kind.
    pub instance_status: String,

    /// The instance status message.
    pub instance_status_info: String,

    /// Units deployed to the machine.
    pub unit_count: i64,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// An application offer advertised from a model.
#[derive(Debug, Clone, FromRow)]
pub struct ApplicationOffer {
    /// Surrogate key.
    pub id: i64,

    /// The model the offer is advertised from.
    pub model_id: i64,

    /// The offered application.
    pub application_name: String,

    /// The offer name, unique within its model.
    pub name: String,

    /// The offer uuid.
    pub uuid: String,

    /// The offer URL.
    pub url: String,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// A user's access entry on a model.
#[derive(Debug, Clone, FromRow)]
pub struct ModelAccessEntry {
    /// The model the entry is on.
    pub model_id: i64,

    /// The user holding the access.
    pub username: String,

    /// The access level: read, write or admin.
    pub access: String,

    /// When the user last connected to the model.
    pub last_connection: Option<DateTime<Utc>>,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const MODEL_COLUMNS: &str = r#"
    m.id, m.name, m.uuid, m.owner_id, u.username AS owner,
    m.controller_id, k.name AS controller_name, k.uuid AS controller_uuid,
    m.cloud_region_id, c.name AS cloud_name, r.name AS region_name,
    m.cloud_credential_id, x.name AS credential_name,
    m.life, m.status, m.status_info, m.status_since, m.status_version,
    m.machine_count, m.core_count, m.unit_count, m.created_at, m.updated_at
"#;

const MODEL_JOINS: &str = r#"
    FROM models m
    JOIN users u ON u.id = m.owner_id
    JOIN controllers k ON k.id = m.controller_id
    JOIN cloud_regions r ON r.id = m.cloud_region_id
    JOIN clouds c ON c.id = r.cloud_id
    JOIN cloud_credentials x ON x.id = m.cloud_credential_id
"#;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Database {
    /// Persists a skeletal model row. A concurrent request for the same
    /// `(owner, name)` fails here with `AlreadyExists`.
    pub async fn add_model(&self, model: &NewModel) -> JimmResult<Model> {
        let owner = self.get_user(&model.owner).await?;
        let now = self.now();
        sqlx::query(
            r#"
            INSERT INTO models (
                name, owner_id, controller_id, cloud_region_id, cloud_credential_id,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.name)
        .bind(owner.id)
        .bind(model.controller_id)
        .bind(model.cloud_region_id)
        .bind(model.cloud_credential_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error(&format!("model {}/{}", model.owner, model.name), e))?;
        self.get_model_by_owner_name(&model.owner, &model.name).await
    }

    /// Fetches the model with the given uuid, if any.
    pub async fn get_model_by_uuid(&self, uuid: &str) -> JimmResult<Option<Model>> {
        let sql = format!("SELECT {} {} WHERE m.uuid = ?", MODEL_COLUMNS, MODEL_JOINS);
        let model = sqlx::query_as::<_, Model>(&sql)
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?;
        Ok(model)
    }

    /// Fetches the model owned by the given user with the given name.
    pub async fn get_model_by_owner_name(&self, owner: &str, name: &str) -> JimmResult<Model> {
        let sql = format!(
            "SELECT {} {} WHERE u.username = ? AND m.name = ?",
            MODEL_COLUMNS, MODEL_JOINS
        );
        sqlx::query_as::<_, Model>(&sql)
            .bind(owner)
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| not_found(format!("model {}/{}", owner, name)))
    }

    /// Lists every model, ordered by uuid for deterministic iteration.
    pub async fn list_models(&self) -> JimmResult<Vec<Model>> {
        let sql = format!("SELECT {} {} ORDER BY m.uuid", MODEL_COLUMNS, MODEL_JOINS);
        let models = sqlx::query_as::<_, Model>(&sql).fetch_all(self.pool()).await?;
        Ok(models)
    }

    /// Lists the models hosted on a controller.
    pub async fn controller_models(&self, controller_id: i64) -> JimmResult<Vec<Model>> {
        let sql = format!(
            "SELECT {} {} WHERE m.controller_id = ? ORDER BY m.uuid",
            MODEL_COLUMNS, MODEL_JOINS
        );
        let models = sqlx::query_as::<_, Model>(&sql)
            .bind(controller_id)
            .fetch_all(self.pool())
            .await?;
        Ok(models)
    }

    /// Records the identity the hosting controller assigned to a model.
    pub async fn set_model_uuid(&self, model_id: i64, uuid: &str) -> JimmResult<()> {
        sqlx::query("UPDATE models SET uuid = ?, updated_at = ? WHERE id = ?")
            .bind(uuid)
            .bind(self.now())
            .bind(model_id)
            .execute(self.pool())
            .await
            .map_err(|e| db_error("model uuid", e))?;
        Ok(())
    }

    /// Updates a model's life value.
    pub async fn set_model_life(&self, model_id: i64, life: &str) -> JimmResult<()> {
        sqlx::query("UPDATE models SET life = ?, updated_at = ? WHERE id = ?")
            .bind(life)
            .bind(self.now())
            .bind(model_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Switches the credential a model deploys with.
    pub async fn set_model_credential(
        &self,
        model_id: i64,
        cloud_credential_id: i64,
    ) -> JimmResult<()> {
        sqlx::query("UPDATE models SET cloud_credential_id = ?, updated_at = ? WHERE id = ?")
            .bind(cloud_credential_id)
            .bind(self.now())
            .bind(model_id)
            .execute(self.pool())
            .await
            .map_err(|e| db_error("model credential", e))?;
        Ok(())
    }

    /// Moves a model to a different controller after migration.
    pub async fn set_model_controller(&self, model_id: i64, controller_id: i64) -> JimmResult<()> {
        sqlx::query("UPDATE models SET controller_id = ?, updated_at = ? WHERE id = ?")
            .bind(controller_id)
            .bind(self.now())
            .bind(model_id)
            .execute(self.pool())
            .await
            .map_err(|e| db_error("model controller", e))?;
        Ok(())
    }

    /// Updates a model's status.
    pub async fn set_model_status(
        &self,
        model_id: i64,
        update: &ModelStatusUpdate,
    ) -> JimmResult<()> {
        sqlx::query(
            r#"
            UPDATE models
            SET status = ?, status_info = ?, status_since = ?, status_version = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.status)
        .bind(&update.info)
        .bind(update.since)
        .bind(&update.version)
        .bind(self.now())
        .bind(model_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Folds summary counts into a model row.
    pub async fn set_model_counts(
        &self,
        uuid: &str,
        machines: i64,
        cores: i64,
        units: i64,
    ) -> JimmResult<()> {
        sqlx::query(
            r#"
            UPDATE models
            SET machine_count = ?, core_count = ?, unit_count = ?, updated_at = ?
            WHERE uuid = ?
            "#,
        )
        .bind(machines)
        .bind(cores)
        .bind(units)
        .bind(self.now())
        .bind(uuid)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Deletes a model row. Children (machines, offers, access entries)
    /// cascade.
    pub async fn delete_model(&self, model_id: i64) -> JimmResult<()> {
        sqlx::query("DELETE FROM models WHERE id = ?")
            .bind(model_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Creates or updates a machine in a model.
    pub async fn upsert_machine(
        &self,
        model_id: i64,
        machine_id: &str,
        display_name: &str,
        instance_id: &str,
        instance_status: &str,
        instance_status_info: &str,
        unit_count: i64,
    ) -> JimmResult<()> {
        let now = self.now();
        sqlx::query(
            r#"
            INSERT INTO machines (
                model_id, machine_id, display_name, instance_id,
                instance_status, instance_status_info, unit_count, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (model_id, machine_id) DO UPDATE SET
                display_name = excluded.display_name,
                instance_id = excluded.instance_id,
                instance_status = excluded.instance_status,
                instance_status_info = excluded.instance_status_info,
                unit_count = excluded.unit_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(model_id)
        .bind(machine_id)
        .bind(display_name)
        .bind(instance_id)
        .bind(instance_status)
        .bind(instance_status_info)
        .bind(unit_count)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error("machine", e))?;
        Ok(())
    }

    /// Lists the machines in a model.
    pub async fn machines(&self, model_id: i64) -> JimmResult<Vec<Machine>> {
        let machines = sqlx::query_as::<_, Machine>(
            "SELECT * FROM machines WHERE model_id = ? ORDER BY machine_id",
        )
        .bind(model_id)
        .fetch_all(self.pool())
        .await?;
        Ok(machines)
    }

    /// Creates an application offer.
    pub async fn add_application_offer(
        &self,
        model_id: i64,
        application_name: &str,
        name: &str,
        uuid: &str,
        url: &str,
    ) -> JimmResult<ApplicationOffer> {
        let now = self.now();
        sqlx::query(
            r#"
            INSERT INTO application_offers (model_id, application_name, name, uuid, url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(model_id)
        .bind(application_name)
        .bind(name)
        .bind(uuid)
        .bind(url)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error(&format!("application offer {}", name), e))?;
        self.get_application_offer(uuid).await
    }

    /// Fetches the application offer with the given uuid.
    pub async fn get_application_offer(&self, uuid: &str) -> JimmResult<ApplicationOffer> {
        sqlx::query_as::<_, ApplicationOffer>("SELECT * FROM application_offers WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| not_found(format!("application offer {}", uuid)))
    }

    /// Lists the offers advertised from a model.
    pub async fn application_offers(&self, model_id: i64) -> JimmResult<Vec<ApplicationOffer>> {
        let offers = sqlx::query_as::<_, ApplicationOffer>(
            "SELECT * FROM application_offers WHERE model_id = ? ORDER BY name",
        )
        .bind(model_id)
        .fetch_all(self.pool())
        .await?;
        Ok(offers)
    }

    /// Records (or updates) a user's access entry on a model. An empty
    /// access level removes the entry.
    pub async fn set_model_access(
        &self,
        model_id: i64,
        username: &str,
        access: &str,
    ) -> JimmResult<()> {
        let user = self.upsert_user(username, None).await?;
        if access.is_empty() {
            sqlx::query("DELETE FROM model_access WHERE model_id = ? AND user_id = ?")
                .bind(model_id)
                .bind(user.id)
                .execute(self.pool())
                .await?;
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO model_access (model_id, user_id, access)
            VALUES (?, ?, ?)
            ON CONFLICT (model_id, user_id) DO UPDATE SET access = excluded.access
            "#,
        )
        .bind(model_id)
        .bind(user.id)
        .bind(access)
        .execute(self.pool())
        .await
        .map_err(|e| db_error("model access", e))?;
        Ok(())
    }

    /// Returns the access level a user holds on a model in the local
    /// catalog, if any.
    pub async fn user_model_access(
        &self,
        model_id: i64,
        username: &str,
    ) -> JimmResult<Option<String>> {
        let access: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT a.access FROM model_access a
            JOIN users u ON u.id = a.user_id
            WHERE a.model_id = ? AND u.username = ?
            "#,
        )
        .bind(model_id)
        .bind(username)
        .fetch_optional(self.pool())
        .await?;
        Ok(access.map(|(a,)| a))
    }

    /// Lists the access entries on a model.
    pub async fn model_access_entries(&self, model_id: i64) -> JimmResult<Vec<ModelAccessEntry>> {
        let entries = sqlx::query_as::<_, ModelAccessEntry>(
            r#"
            SELECT a.model_id, u.username, a.access, a.last_connection
            FROM model_access a
            JOIN users u ON u.id = a.user_id
            WHERE a.model_id = ?
            ORDER BY u.username
            "#,
        )
        .bind(model_id)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    /// Lists the models a user has an explicit access entry on, with the
    /// granted level.
    pub async fn user_models(&self, username: &str) -> JimmResult<Vec<(Model, String)>> {
        let sql = format!(
            r#"
            SELECT {}, a.access AS user_access {}
            JOIN model_access a ON a.model_id = m.id
            JOIN users au ON au.id = a.user_id
            WHERE au.username = ?
            ORDER BY m.uuid
            "#,
            MODEL_COLUMNS, MODEL_JOINS
        );
        let rows = sqlx::query(&sql).bind(username).fetch_all(self.pool()).await?;
        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            use sqlx::Row;
            let model = Model::from_row(&row)?;
            let access: String = row.try_get("user_access")?;
            models.push((model, access));
        }
        Ok(models)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
