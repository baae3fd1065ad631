//! Controller administration: registration, model import and migration,
//! and controller-level access queries.

use std::collections::HashMap;

use semver::Version;
use typed_builder::TypedBuilder;

use crate::api::ModelDelta;
use crate::auth::{Relation, RelationTuple};
use crate::db::{ImportedCloud, ImportedCloudUser, NewController, NewModel};
use crate::names::{is_external_user, require_external_user, Tag};
use crate::secrets::controller_secret_path;
use crate::utils::EVERYONE_USER;
use crate::{JimmError, JimmResult};

use super::Jimm;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Placement priority for the region a controller is deployed in.
pub const PRIORITY_DEPLOYED: i64 = 10;

/// Placement priority for every other region the controller supports.
pub const PRIORITY_SUPPORTED: i64 = 1;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The parameters for registering a controller.
#[derive(Debug, Clone, TypedBuilder)]
pub struct AddControllerArgs {
    /// The name to register the controller under.
    pub name: String,

    /// The controller's `host:port` addresses.
    #[builder(default)]
    pub addresses: Vec<String>,

    /// The CA certificate presented by the controller.
    #[builder(default)]
    pub ca_cert: String,

    /// The admin username used to dial the controller.
    pub admin_user: String,

    /// The admin password used to dial the controller.
    pub admin_password: String,

    /// Whether the controller may host models for any user.
    #[builder(default = true)]
    pub public: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Jimm {
    /// Registers a controller: dials it, imports its clouds and regions,
    /// stores the controller record and seeds the relation graph. Jimm
    /// administrators only.
    pub async fn add_controller(
        &self,
        username: &str,
        args: &AddControllerArgs,
    ) -> JimmResult<crate::db::Controller> {
        let result = self.add_controller_inner(username, args).await;
        self.audit(
            username,
            "add_controller",
            result.is_ok(),
            serde_json::json!({"name": &args.name}),
        )
        .await;
        result
    }

    async fn add_controller_inner(
        &self,
        username: &str,
        args: &AddControllerArgs,
    ) -> JimmResult<crate::db::Controller> {
        self.require_jimm_admin(username).await?;

        // Dial outside the cache: the controller has no uuid to key a
        // cache slot by until it reports one.
        let probe = NewController::builder()
            .name(args.name.clone())
            .uuid(String::new())
            .addresses(args.addresses.clone())
            .ca_cert(args.ca_cert.clone())
            .admin_user(args.admin_user.clone())
            .admin_password(args.admin_password.clone())
            .public(args.public)
            .build();
        let conn = self
            .cache
            .open_uncached(&probe_record(&probe, self.clock.now()))
            .await
            .map_err(|e| {
                tracing::error!(controller = %args.name, error = %e, "failed to dial the controller");
                e
            })?;

        let summary = conn.api().controller_model_summary().await.map_err(|e| {
            tracing::error!(controller = %args.name, error = %e, "failed to get model summary");
            JimmError::from(e)
        })?;

        // Import every cloud the controller knows, with the users allowed
        // to access it. The controller model's own cloud is instead opened
        // to every authenticated user for add-model.
        let clouds = conn.api().clouds().await?;
        let mut imported = Vec::with_capacity(clouds.len());
        for cloud in clouds {
            let users = if cloud.name == summary.cloud {
                vec![ImportedCloudUser {
                    username: EVERYONE_USER.to_string(),
                    display_name: String::new(),
                    access: "add-model".to_string(),
                }]
            } else {
                match conn.api().cloud_info(&cloud.name).await {
                    Ok(info) => info
                        .users
                        .into_iter()
                        // Users local to the controller are not propagated.
                        .filter(|u| is_external_user(&u.username))
                        .map(|u| ImportedCloudUser {
                            username: u.username,
                            display_name: u.display_name,
                            access: u.access,
                        })
                        .collect(),
                    Err(e) => {
                        // The user access can be fixed later.
                        tracing::error!(cloud = %cloud.name, error = %e, "cannot get cloud users");
                        Vec::new()
                    }
                }
            };
            imported.push(ImportedCloud {
                name: cloud.name,
                provider_type: cloud.provider_type,
                regions: cloud.regions,
                users,
            });
        }

        // Admin credentials go to the secret store when one is configured,
        // never in plain text alongside the catalog.
        let mut record = NewController::builder()
            .name(args.name.clone())
            .uuid(summary.uuid.clone())
            .addresses(args.addresses.clone())
            .ca_cert(args.ca_cert.clone())
            .admin_user(args.admin_user.clone())
            .admin_password(args.admin_password.clone())
            .public(args.public)
            .agent_version(summary.agent_version.clone())
            .build();
        if let Some(store) = &self.secret_store {
            let mut attributes = HashMap::new();
            attributes.insert("username".to_string(), args.admin_user.clone());
            attributes.insert("password".to_string(), args.admin_password.clone());
            store
                .put(&controller_secret_path(&args.name), attributes)
                .await?;
            record.admin_user = String::new();
            record.admin_password = String::new();
            record.credentials_in_store = true;
        }

        let controller = self
            .database
            .import_controller(
                &record,
                &imported,
                (summary.cloud.as_str(), summary.cloud_region.as_str()),
                PRIORITY_DEPLOYED,
                PRIORITY_SUPPORTED,
            )
            .await?;

        // Seed the relation graph; failures are logged and repaired by the
        // monitor rather than failing the registration.
        let mut tuples = vec![RelationTuple::new(
            self.resource_tag(),
            Relation::Controller,
            Tag::controller(controller.uuid.clone()),
        )];
        for cloud in &imported {
            tuples.push(RelationTuple::new(
                Tag::controller(controller.uuid.clone()),
                Relation::Controller,
                Tag::cloud(cloud.name.clone()),
            ));
            for user in &cloud.users {
                if user.access == "admin" {
                    tuples.push(RelationTuple::new(
                        Tag::user(user.username.clone()),
                        Relation::Administrator,
                        Tag::cloud(cloud.name.clone()),
                    ));
                }
            }
        }
        if let Err(e) = self.checker.store().write(&tuples).await {
            tracing::error!(controller = %controller.name, error = %e,
                "failed to add controller relations");
        }

        Ok(controller)
    }

    /// Imports an existing model from a controller, attaching it to the
    /// named owner. Jimm administrators only.
    pub async fn import_model(
        &self,
        username: &str,
        controller_name: &str,
        model_uuid: &str,
        new_owner: Option<&str>,
    ) -> JimmResult<crate::db::Model> {
        let result = self
            .import_model_inner(username, controller_name, model_uuid, new_owner)
            .await;
        self.audit(
            username,
            "import_model",
            result.is_ok(),
            serde_json::json!({"controller": controller_name, "model": model_uuid}),
        )
        .await;
        result
    }

    async fn import_model_inner(
        &self,
        username: &str,
        controller_name: &str,
        model_uuid: &str,
        new_owner: Option<&str>,
    ) -> JimmResult<crate::db::Model> {
        self.require_jimm_admin(username).await?;

        let controller = self.database.get_controller(controller_name).await?;
        let conn = self.dial(&controller).await?;
        let info = conn.api().model_info(model_uuid).await?;

        let owner = match new_owner {
            Some(owner) => owner.to_string(),
            None => info.owner.clone(),
        };
        require_external_user(&owner)?;
        let owner = self.database.upsert_user(&owner, None).await?.username;

        // The model keeps deploying with its own credential; jimm only
        // needs some credential reference against the model's cloud.
        let credentials = self.database.user_credentials(&owner, &info.cloud).await?;
        let credential = credentials.first().ok_or_else(|| {
            JimmError::NotFound(format!(
                "cloud credential for user {} on cloud {}",
                owner, info.cloud
            ))
        })?;

        let region = self
            .database
            .get_cloud_region(&info.cloud, &info.cloud_region)
            .await?;

        let model = self
            .database
            .add_model(
                &NewModel::builder()
                    .name(info.name.clone())
                    .owner(owner.clone())
                    .controller_id(controller.id)
                    .cloud_region_id(region.id)
                    .cloud_credential_id(credential.id)
                    .build(),
            )
            .await?;
        self.database.set_model_uuid(model.id, model_uuid).await?;
        self.database.set_model_life(model.id, &info.life).await?;

        // Only the new owner is granted access; access is governed by jimm
        // from here on, so previous model users are discarded.
        self.checker
            .store()
            .write(&[
                RelationTuple::new(
                    Tag::user(owner.clone()),
                    Relation::Administrator,
                    Tag::model(model_uuid),
                ),
                RelationTuple::new(
                    Tag::controller(controller.uuid.clone()),
                    Relation::Controller,
                    Tag::model(model_uuid),
                ),
            ])
            .await?;
        self.database.set_model_access(model.id, &owner, "admin").await?;

        // Seed the machine projection from an initial watcher round.
        let watcher_id = conn.api().watch_all(model_uuid).await?;
        let deltas = conn.api().model_watcher_next(&watcher_id).await?;
        if let Err(e) = conn.api().model_watcher_stop(&watcher_id).await {
            tracing::warn!(model = model_uuid, error = %e, "failed to stop model watcher");
        }
        for delta in deltas {
            let ModelDelta::Machine(machine) = delta else {
                continue;
            };
            if machine.model_uuid != model_uuid {
                continue;
            }
            self.database
                .upsert_machine(
                    model.id,
                    &machine.machine_id,
                    &machine.display_name,
                    &machine.instance_id,
                    &machine.status,
                    &machine.message,
                    machine.units,
                )
                .await?;
        }

        self.require_model(model_uuid).await
    }

    /// Verifies that a migrated model is now known to the target
    /// controller and reassigns it locally. Jimm administrators only.
    pub async fn update_migrated_model(
        &self,
        username: &str,
        model_uuid: &str,
        target_controller_name: &str,
    ) -> JimmResult<()> {
        self.require_jimm_admin(username).await?;

        let model = self
            .database
            .get_model_by_uuid(model_uuid)
            .await?
            .ok_or_else(|| JimmError::ModelNotFound(model_uuid.to_string()))?;

        let target = self.database.get_controller(target_controller_name).await?;

        // The target controller must already know the model.
        let conn = self.dial(&target).await?;
        conn.api().model_info(model_uuid).await?;

        self.database.set_model_controller(model.id, target.id).await?;
        self.audit(
            username,
            "update_migrated_model",
            true,
            serde_json::json!({"model": model_uuid, "controller": target_controller_name}),
        )
        .await;
        Ok(())
    }

    /// Returns the earliest agent version among the public controllers, or
    /// `None` when no version is known.
    pub async fn earliest_controller_version(&self) -> JimmResult<Option<Version>> {
        let mut earliest: Option<Version> = None;
        for controller in self.database.list_controllers().await? {
            if !controller.public || controller.agent_version.is_empty() {
                continue;
            }
            let version = match Version::parse(&controller.agent_version) {
                Ok(version) => version,
                Err(_) => {
                    tracing::error!(
                        version = %controller.agent_version,
                        controller = %controller.name,
                        "failed to parse agent version"
                    );
                    continue;
                }
            };
            if earliest.as_ref().map_or(true, |e| version < *e) {
                earliest = Some(version);
            }
        }
        Ok(earliest)
    }

    /// Returns the jimm controller access level for the requested user:
    /// `superuser` for jimm administrators, `login` otherwise. Only
    /// administrators may ask about other users.
    pub async fn get_jimm_controller_access(
        &self,
        username: &str,
        target_username: &str,
    ) -> JimmResult<String> {
        let caller_is_admin = self.is_jimm_admin(username).await?;

        if username == target_username {
            return Ok(if caller_is_admin { "superuser" } else { "login" }.to_string());
        }
        if !caller_is_admin {
            return Err(JimmError::Unauthorized("unauthorized".to_string()));
        }
        let target_is_admin = self.is_jimm_admin(target_username).await?;
        Ok(if target_is_admin { "superuser" } else { "login" }.to_string())
    }

    /// Returns the user's access level on one of the backing controllers.
    pub async fn get_user_controller_access(
        &self,
        username: &str,
        controller_name: &str,
    ) -> JimmResult<String> {
        let controller = self.database.get_controller(controller_name).await?;
        let tuple = RelationTuple::new(
            Tag::user(username),
            Relation::Administrator,
            Tag::controller(controller.uuid),
        );
        let (admin, _) = self.checker.check(&tuple, false).await?;
        Ok(if admin { "superuser" } else { "login" }.to_string())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds a transient controller record for the registration probe dial.
fn probe_record(
    new: &NewController,
    now: chrono::DateTime<chrono::Utc>,
) -> crate::db::Controller {
    crate::db::Controller {
        id: 0,
        name: new.name.clone(),
        uuid: new.uuid.clone(),
        public: new.public,
        deprecated: false,
        agent_version: new.agent_version.clone(),
        addresses: serde_json::to_string(&new.addresses).unwrap_or_else(|_| "[]".to_string()),
        ca_cert: new.ca_cert.clone(),
        admin_user: new.admin_user.clone(),
        admin_password: new.admin_password.clone(),
        credentials_in_store: false,
        unavailable_since: None,
        last_seen: None,
        created_at: now,
        updated_at: now,
    }
}
