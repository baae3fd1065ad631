use chrono::{DateTime, Utc};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::JimmResult;

use super::{db_error, not_found, Database};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A backing Juju controller.
#[derive(Debug, Clone, FromRow)]
pub struct Controller {
    /// Surrogate key.
    pub id: i64,

    /// The controller name, unique across jimm.
    pub name: String,

    /// The controller uuid.
    pub uuid: String,

    /// Whether the controller is available to host new models from any
    /// user.
    pub public: bool,

    /// A deprecated controller is excluded from placement.
    pub deprecated: bool,

    /// The agent version last reported by the controller.
    pub agent_version: String,

    /// JSON list of `host:port` addresses.
    pub addresses: String,

    /// The CA certificate presented by the controller.
    pub ca_cert: String,

    /// Admin username; empty when held in the secret store.
    pub admin_user: String,

    /// Admin password; empty when held in the secret store.
    pub admin_password: String,

    /// Whether the admin credentials live in the secret store.
    pub credentials_in_store: bool,

    /// Set while the controller is unreachable.
    pub unavailable_since: Option<DateTime<Utc>>,

    /// When the controller was last successfully contacted.
    pub last_seen: Option<DateTime<Utc>>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
}

/// The parameters for registering a controller.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewController {
    /// The controller name.
    pub name: String,

    /// The controller uuid.
    pub uuid: String,

    /// Whether the controller is public.
    #[builder(default = true)]
    pub public: bool,

    /// The controller's `host:port` addresses.
    #[builder(default)]
    pub addresses: Vec<String>,

    /// The CA certificate presented by the controller.
    #[builder(default)]
    pub ca_cert: String,

    /// The admin username.
    #[builder(default)]
    pub admin_user: String,

    /// The admin password.
    #[builder(default)]
    pub admin_password: String,

    /// Whether the admin credentials were stored in the secret store
    /// instead of the catalog.
    #[builder(default = false)]
    pub credentials_in_store: bool,

    /// The agent version reported at registration.
    #[builder(default)]
    pub agent_version: String,
}

/// One placement candidate: a controller deployed to (or supporting) a
/// cloud region with a priority.
#[derive(Debug, Clone, FromRow)]
pub struct PlacementCandidate {
    /// The region the candidate serves.
    pub cloud_region_id: i64,

    /// The region name.
    pub region_name: String,

    /// The candidate controller.
    pub controller_id: i64,

    /// The candidate controller's name.
    pub controller_name: String,

    /// The candidate controller's uuid.
    pub controller_uuid: String,

    /// Placement priority; higher is preferred.
    pub priority: i64,
}

/// A cloud as reported by a controller being registered, imported into the
/// catalog alongside it.
#[derive(Debug, Clone)]
pub struct ImportedCloud {
    /// The cloud name.
    pub name: String,

    /// The provider type.
    pub provider_type: String,

    /// The region names.
    pub regions: Vec<String>,

    /// The users with access to the cloud.
    pub users: Vec<ImportedCloudUser>,
}

/// One user's access to an imported cloud.
#[derive(Debug, Clone)]
pub struct ImportedCloudUser {
    /// The username.
    pub username: String,

    /// The user's display name.
    pub display_name: String,

    /// The access level.
    pub access: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Controller {
    /// The controller's `host:port` addresses.
    pub fn address_list(&self) -> Vec<String> {
        serde_json::from_str(&self.addresses).unwrap_or_default()
    }
}

impl Database {
    /// Registers a controller.
    pub async fn add_controller(&self, controller: &NewController) -> JimmResult<Controller> {
        let now = self.now();
        let addresses = serde_json::to_string(&controller.addresses)?;
        sqlx::query(
            r#"
            INSERT INTO controllers (
                name, uuid, public, deprecated, agent_version, addresses, ca_cert,
                admin_user, admin_password, credentials_in_store, created_at, updated_at
            )
            VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&controller.name)
        .bind(&controller.uuid)
        .bind(controller.public)
        .bind(&controller.agent_version)
        .bind(&addresses)
        .bind(&controller.ca_cert)
        .bind(&controller.admin_user)
        .bind(&controller.admin_password)
        .bind(controller.credentials_in_store)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error(&format!("controller {}", controller.name), e))?;
        self.get_controller(&controller.name).await
    }

    /// Fetches the controller with the given name.
    pub async fn get_controller(&self, name: &str) -> JimmResult<Controller> {
        sqlx::query_as::<_, Controller>("SELECT * FROM controllers WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| not_found(format!("controller {}", name)))
    }

    /// Fetches the controller with the given uuid.
    pub async fn get_controller_by_uuid(&self, uuid: &str) -> JimmResult<Controller> {
        sqlx::query_as::<_, Controller>("SELECT * FROM controllers WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| not_found(format!("controller {}", uuid)))
    }

    /// Lists every controller, ordered by name.
    pub async fn list_controllers(&self) -> JimmResult<Vec<Controller>> {
        let controllers =
            sqlx::query_as::<_, Controller>("SELECT * FROM controllers ORDER BY name")
                .fetch_all(self.pool())
                .await?;
        Ok(controllers)
    }

    /// Removes a controller. Fails with `BadRequest` while models still
    /// reference it.
    pub async fn remove_controller(&self, name: &str) -> JimmResult<()> {
        let controller = self.get_controller(name).await?;
        sqlx::query("DELETE FROM controllers WHERE id = ?")
            .bind(controller.id)
            .execute(self.pool())
            .await
            .map_err(|e| db_error(&format!("controller {}", name), e))?;
        Ok(())
    }

    /// Records that a controller serves a cloud region with the given
    /// placement priority.
    pub async fn set_region_priority(
        &self,
        controller_id: i64,
        cloud_region_id: i64,
        priority: i64,
    ) -> JimmResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cloud_region_controller_priorities (cloud_region_id, controller_id, priority)
            VALUES (?, ?, ?)
            ON CONFLICT (cloud_region_id, controller_id) DO UPDATE SET priority = excluded.priority
            "#,
        )
        .bind(cloud_region_id)
        .bind(controller_id)
        .bind(priority)
        .execute(self.pool())
        .await
        .map_err(|e| db_error("region priority", e))?;
        Ok(())
    }

    /// Lists the placement candidates for a cloud, optionally narrowed to
    /// one region. Only reachable, non-deprecated controllers with a
    /// positive priority qualify.
    pub async fn placement_candidates(
        &self,
        cloud_name: &str,
        region_name: Option<&str>,
    ) -> JimmResult<Vec<PlacementCandidate>> {
        let mut sql = String::from(
            r#"
            SELECT p.cloud_region_id, r.name AS region_name,
                   p.controller_id, k.name AS controller_name, k.uuid AS controller_uuid,
                   p.priority
            FROM cloud_region_controller_priorities p
            JOIN cloud_regions r ON r.id = p.cloud_region_id
            JOIN clouds c ON c.id = r.cloud_id
            JOIN controllers k ON k.id = p.controller_id
            WHERE c.name = ? AND p.priority > 0
              AND k.deprecated = 0 AND k.unavailable_since IS NULL
            "#,
        );
        if region_name.is_some() {
            sql.push_str(" AND r.name = ?");
        }
        let mut query = sqlx::query_as::<_, PlacementCandidate>(&sql).bind(cloud_name);
        if let Some(region) = region_name {
            query = query.bind(region);
        }
        let candidates = query.fetch_all(self.pool()).await?;
        Ok(candidates)
    }

    /// Marks a controller unreachable. The timestamp is only set on the
    /// transition into unavailability.
    pub async fn set_controller_unavailable(&self, name: &str) -> JimmResult<()> {
        let now = self.now();
        sqlx::query(
            r#"
            UPDATE controllers
            SET unavailable_since = COALESCE(unavailable_since, ?), updated_at = ?
            WHERE name = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(name)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Records a successful contact with a controller, clearing any
    /// unavailability marker and updating the reported agent version.
    pub async fn controller_seen(
        &self,
        name: &str,
        agent_version: Option<&str>,
    ) -> JimmResult<()> {
        let now = self.now();
        sqlx::query(
            r#"
            UPDATE controllers
            SET unavailable_since = NULL,
                last_seen = ?,
                agent_version = COALESCE(?, agent_version),
                updated_at = ?
            WHERE name = ?
            "#,
        )
        .bind(now)
        .bind(agent_version)
        .bind(now)
        .bind(name)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Registers a controller together with the clouds, regions and cloud
    /// access entries it reported, in a single transaction. The region the
    /// controller is deployed in receives `deployed_priority`; every other
    /// region `supported_priority`.
    pub async fn import_controller(
        &self,
        controller: &NewController,
        clouds: &[ImportedCloud],
        deployed: (&str, &str),
        deployed_priority: i64,
        supported_priority: i64,
    ) -> JimmResult<Controller> {
        let now = self.now();
        let addresses = serde_json::to_string(&controller.addresses)?;
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO controllers (
                name, uuid, public, deprecated, agent_version, addresses, ca_cert,
                admin_user, admin_password, credentials_in_store, created_at, updated_at
            )
            VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&controller.name)
        .bind(&controller.uuid)
        .bind(controller.public)
        .bind(&controller.agent_version)
        .bind(&addresses)
        .bind(&controller.ca_cert)
        .bind(&controller.admin_user)
        .bind(&controller.admin_password)
        .bind(controller.credentials_in_store)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(&format!("controller {}", controller.name), e))?;
        let (controller_id,): (i64,) =
            sqlx::query_as("SELECT id FROM controllers WHERE name = ?")
                .bind(&controller.name)
                .fetch_one(&mut *tx)
                .await?;

        for cloud in clouds {
            sqlx::query(
                r#"
                INSERT INTO clouds (name, provider_type, created_at, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (name) DO UPDATE SET provider_type = excluded.provider_type
                "#,
            )
            .bind(&cloud.name)
            .bind(&cloud.provider_type)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(&format!("cloud {}", cloud.name), e))?;
            let (cloud_id,): (i64,) = sqlx::query_as("SELECT id FROM clouds WHERE name = ?")
                .bind(&cloud.name)
                .fetch_one(&mut *tx)
                .await?;

            for region in &cloud.regions {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO cloud_regions (cloud_id, name, created_at, updated_at)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(cloud_id)
                .bind(region)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                let (region_id,): (i64,) =
                    sqlx::query_as("SELECT id FROM cloud_regions WHERE cloud_id = ? AND name = ?")
                        .bind(cloud_id)
                        .bind(region)
                        .fetch_one(&mut *tx)
                        .await?;

                let priority = if cloud.name == deployed.0 && region == deployed.1 {
                    deployed_priority
                } else {
                    supported_priority
                };
                sqlx::query(
                    r#"
                    INSERT INTO cloud_region_controller_priorities (cloud_region_id, controller_id, priority)
                    VALUES (?, ?, ?)
                    ON CONFLICT (cloud_region_id, controller_id) DO UPDATE SET priority = excluded.priority
                    "#,
                )
                .bind(region_id)
                .bind(controller_id)
                .bind(priority)
                .execute(&mut *tx)
                .await?;
            }

            for user in &cloud.users {
                sqlx::query(
                    r#"
                    INSERT INTO users (username, display_name, created_at, updated_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT (username) DO NOTHING
                    "#,
                )
                .bind(&user.username)
                .bind(&user.display_name)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                let (user_id,): (i64,) = sqlx::query_as("SELECT id FROM users WHERE username = ?")
                    .bind(&user.username)
                    .fetch_one(&mut *tx)
                    .await?;
                sqlx::query(
                    r#"
                    INSERT INTO cloud_access (cloud_id, user_id, access)
                    VALUES (?, ?, ?)
                    ON CONFLICT (cloud_id, user_id) DO UPDATE SET access = excluded.access
                    "#,
                )
                .bind(cloud_id)
                .bind(user_id)
                .bind(&user.access)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        self.get_controller(&controller.name).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
