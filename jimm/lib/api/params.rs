//! Parameter and result types exchanged with backing controllers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A summary of the controller's own model, read when a controller is
/// registered.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct ControllerModelSummary {
    /// The controller uuid.
    pub uuid: String,

    /// The cloud the controller model runs in.
    pub cloud: String,

    /// The region the controller model runs in.
    pub cloud_region: String,

    /// The controller's agent version.
    pub agent_version: String,
}

/// A cloud as listed by a controller.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct CloudSpec {
    /// The cloud name.
    pub name: String,

    /// The provider type.
    pub provider_type: String,

    /// The region names.
    #[builder(default)]
    pub regions: Vec<String>,
}

/// Detailed cloud information, including user access entries.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct CloudInfo {
    /// The cloud itself.
    pub cloud: CloudSpec,

    /// The users with access to the cloud.
    #[builder(default)]
    pub users: Vec<CloudUserInfo>,
}

/// One user's access to a cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudUserInfo {
    /// The username.
    pub username: String,

    /// The user's display name.
    pub display_name: String,

    /// The access level.
    pub access: String,
}

/// The request to create a model on a controller.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct ModelCreateRequest {
    /// The model name.
    pub name: String,

    /// The owning user's username.
    pub owner: String,

    /// The cloud to host the model.
    pub cloud: String,

    /// The region within the cloud.
    pub region: String,

    /// The `<cloud>/<owner>/<name>` path of the deployment credential.
    pub credential_path: String,

    /// Model configuration.
    #[builder(default)]
    pub config: HashMap<String, serde_json::Value>,
}

/// Information about a model as reported by its controller.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct ModelInfo {
    /// The model uuid.
    pub uuid: String,

    /// The model name.
    pub name: String,

    /// The owning user's username.
    pub owner: String,

    /// The cloud hosting the model.
    pub cloud: String,

    /// The region hosting the model.
    pub cloud_region: String,

    /// The life status.
    #[builder(default = "alive".to_string())]
    pub life: String,

    /// The current model status.
    #[builder(default)]
    pub status: EntityStatus,

    /// The users with access to the model.
    #[builder(default)]
    pub users: Vec<ModelUserInfo>,

    /// The model's agent version.
    #[builder(default, setter(strip_option))]
    pub agent_version: Option<String>,
}

/// The status of an entity on a controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStatus {
    /// The status kind.
    pub status: String,

    /// The status message.
    pub info: String,

    /// When the status last changed.
    pub since: Option<DateTime<Utc>>,
}

/// One user's access to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUserInfo {
    /// The username.
    pub username: String,

    /// The user's display name.
    pub display_name: String,

    /// The access level: read, write or admin.
    pub access: String,

    /// When the user last connected.
    pub last_connection: Option<DateTime<Utc>>,
}

/// The status projection of a model.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct ModelStatusInfo {
    /// The model uuid.
    pub uuid: String,

    /// The life status.
    pub life: String,

    /// Machines hosted in the model.
    pub hosted_machine_count: i64,

    /// Applications deployed in the model.
    pub application_count: i64,
}

/// A credential together with its path, as pushed to controllers.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct TaggedCredential {
    /// The `<cloud>/<owner>/<name>` path.
    pub path: String,

    /// The authentication type.
    pub auth_type: String,

    /// The credential attributes.
    #[builder(default)]
    pub attributes: HashMap<String, String>,
}

/// The effect of a credential change on one model.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct UpdateCredentialModelResult {
    /// The affected model's uuid.
    pub model_uuid: String,

    /// The affected model's name.
    pub model_name: String,

    /// Errors that block the change, if any.
    #[builder(default)]
    pub errors: Vec<String>,
}

/// A change reported by a model watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelDelta {
    /// A machine changed.
    Machine(MachineDelta),

    /// A change jimm does not track.
    #[serde(other)]
    Other,
}

/// A machine change reported by a model watcher.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct MachineDelta {
    /// The model the machine belongs to.
    pub model_uuid: String,

    /// The machine id within the model.
    pub machine_id: String,

    /// The machine display name.
    #[builder(default)]
    pub display_name: String,

    /// The cloud instance id.
    #[builder(default)]
    pub instance_id: String,

    /// The instance status kind.
    #[builder(default)]
    pub status: String,

    /// The instance status message.
    #[builder(default)]
    pub message: String,

    /// Units deployed to the machine.
    #[builder(default)]
    pub units: i64,
}

/// One model's summary as published by the summary watcher.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct ModelSummary {
    /// The model uuid.
    pub uuid: String,

    /// The model name.
    pub name: String,

    /// The owning user's username.
    pub owner: String,

    /// The current model status kind.
    #[builder(default)]
    pub status: String,

    /// Machines in the model.
    #[builder(default)]
    pub machine_count: i64,

    /// Cores in the model.
    #[builder(default)]
    pub core_count: i64,

    /// Units in the model.
    #[builder(default)]
    pub unit_count: i64,
}
