//! The upstream controller capability: the operations jimm requires of a
//! backing Juju controller, the reference-counted connections that carry
//! them, and the process-wide connection cache.
//!
//! The wire protocol behind [`ControllerApi`] is not implemented here; a
//! [`Dialer`] produces the capability for a controller and everything above
//! it is protocol-agnostic.

mod cache;
mod conn;
mod params;

use async_trait::async_trait;
use thiserror::Error;

use crate::ErrorCode;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cache::*;
pub use conn::*;
pub use params::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a controller API call.
pub type ApiResult<T> = Result<T, ApiError>;

/// The coded errors a controller can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    /// The named entity already exists on the controller.
    AlreadyExists,

    /// The named entity is not known to the controller.
    NotFound,

    /// The controller is in the middle of an upgrade.
    UpgradeInProgress,

    /// The connection's identity is not allowed to do that.
    Unauthorized,

    /// The request was malformed.
    BadRequest,
}

/// An error returned by a backing controller.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    /// The error code, when the controller supplied a recognized one.
    pub code: Option<ApiErrorCode>,

    /// The error message.
    pub message: String,
}

/// The operations jimm requires of a backing controller.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// Authenticates the connection. Called once after dialing.
    async fn login(&self) -> ApiResult<()>;

    /// Returns a summary of the controller's own model.
    async fn controller_model_summary(&self) -> ApiResult<ControllerModelSummary>;

    /// Lists the clouds the controller can host models on.
    async fn clouds(&self) -> ApiResult<Vec<CloudSpec>>;

    /// Returns detailed information about one cloud, including its user
    /// access entries.
    async fn cloud_info(&self, cloud: &str) -> ApiResult<CloudInfo>;

    /// Returns information about a model.
    async fn model_info(&self, model_uuid: &str) -> ApiResult<ModelInfo>;

    /// Creates a model.
    async fn create_model(&self, args: &ModelCreateRequest) -> ApiResult<ModelInfo>;

    /// Starts the destruction of a model.
    async fn destroy_model(
        &self,
        model_uuid: &str,
        destroy_storage: Option<bool>,
        force: Option<bool>,
    ) -> ApiResult<()>;

    /// Returns the status of a model.
    async fn model_status(&self, model_uuid: &str) -> ApiResult<ModelStatusInfo>;

    /// Grants a user access to a model.
    async fn grant_model_access(
        &self,
        model_uuid: &str,
        username: &str,
        access: &str,
    ) -> ApiResult<()>;

    /// Revokes a user's access to a model.
    async fn revoke_model_access(
        &self,
        model_uuid: &str,
        username: &str,
        access: &str,
    ) -> ApiResult<()>;

    /// Grants jimm admin access on a model so jimm can manage it later.
    async fn grant_jimm_model_admin(&self, model_uuid: &str) -> ApiResult<()>;

    /// Pushes a credential to the controller, returning the models it
    /// affects.
    async fn update_credential(
        &self,
        credential: &TaggedCredential,
    ) -> ApiResult<Vec<UpdateCredentialModelResult>>;

    /// Whether the controller supports dry-run credential validation
    /// (cloud facade v3).
    fn supports_check_credential_models(&self) -> bool;

    /// Validates a credential against the models using it without
    /// committing anything.
    async fn check_credential_models(
        &self,
        credential: &TaggedCredential,
    ) -> ApiResult<Vec<UpdateCredentialModelResult>>;

    /// Tells the controller to drop a credential.
    async fn revoke_credential(&self, credential_path: &str) -> ApiResult<()>;

    /// Switches the credential a model deploys with.
    async fn change_model_credential(
        &self,
        model_uuid: &str,
        credential_path: &str,
    ) -> ApiResult<()>;

    /// Opens an all-entities watcher on a model, returning its id.
    async fn watch_all(&self, model_uuid: &str) -> ApiResult<String>;

    /// Returns the next batch of deltas from a model watcher.
    async fn model_watcher_next(&self, watcher_id: &str) -> ApiResult<Vec<ModelDelta>>;

    /// Stops a model watcher.
    async fn model_watcher_stop(&self, watcher_id: &str) -> ApiResult<()>;

    /// Whether the controller supports the all-model summary watcher.
    fn supports_model_summary_watcher(&self) -> bool;

    /// Opens the all-model summary watcher, returning its id.
    async fn watch_all_model_summaries(&self) -> ApiResult<String>;

    /// Returns the next batch of summaries from the summary watcher.
    async fn model_summary_watcher_next(&self, watcher_id: &str)
        -> ApiResult<Vec<ModelSummary>>;

    /// Stops the summary watcher.
    async fn model_summary_watcher_stop(&self, watcher_id: &str) -> ApiResult<()>;

    /// Closes the connection.
    async fn close(&self);
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ApiError {
    /// Creates an error with the given code.
    pub fn coded(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Creates an error without a recognized code.
    pub fn new(message: impl Into<String>) -> Self {
        ApiError {
            code: None,
            message: message.into(),
        }
    }

    /// True if the controller reported the entity as already existing.
    pub fn is_already_exists(&self) -> bool {
        self.code == Some(ApiErrorCode::AlreadyExists)
    }

    /// True if the controller reported the entity as unknown.
    pub fn is_not_found(&self) -> bool {
        self.code == Some(ApiErrorCode::NotFound)
    }

    /// True if the controller refused because it is upgrading.
    pub fn is_upgrade_in_progress(&self) -> bool {
        self.code == Some(ApiErrorCode::UpgradeInProgress)
    }

    /// Maps the controller code onto jimm's stable taxonomy.
    pub fn jimm_code(&self) -> ErrorCode {
        match self.code {
            Some(ApiErrorCode::AlreadyExists) => ErrorCode::AlreadyExists,
            Some(ApiErrorCode::NotFound) => ErrorCode::NotFound,
            Some(ApiErrorCode::UpgradeInProgress) => ErrorCode::UpgradeInProgress,
            Some(ApiErrorCode::Unauthorized) => ErrorCode::Unauthorized,
            Some(ApiErrorCode::BadRequest) => ErrorCode::BadRequest,
            None => ErrorCode::Internal,
        }
    }
}
