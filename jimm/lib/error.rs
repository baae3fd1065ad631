use thiserror::Error;

use crate::api::ApiError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a jimm-related operation.
pub type JimmResult<T> = Result<T, JimmError>;

/// Stable error codes surfaced to callers. The same names are used in code
/// and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Identity missing, token denied, or an authorization check failed.
    Unauthorized,

    /// A catalog lookup missed.
    NotFound,

    /// A unique constraint was violated.
    AlreadyExists,

    /// Malformed tag, bad region, invalid access level.
    BadRequest,

    /// An upstream dial or stream error.
    ConnectionFailed,

    /// The controller refused because it is upgrading.
    UpgradeInProgress,

    /// The requested model is not known to jimm.
    ModelNotFound,

    /// Credential attributes were expected in the secret store but missing.
    CredentialAttributesNotFound,

    /// The caller's deadline elapsed during a fan-out operation.
    TimedOut,

    /// Anything without a more specific code.
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::NotFound => "not found",
            ErrorCode::AlreadyExists => "already exists",
            ErrorCode::BadRequest => "bad request",
            ErrorCode::ConnectionFailed => "connection failed",
            ErrorCode::UpgradeInProgress => "upgrade in progress",
            ErrorCode::ModelNotFound => "model not found",
            ErrorCode::CredentialAttributesNotFound => "credential attributes not found",
            ErrorCode::TimedOut => "timed out",
            ErrorCode::Internal => "internal error",
        };
        write!(f, "{}", s)
    }
}

/// An error that occurred during a jimm operation.
#[derive(Debug, Error)]
pub enum JimmError {
    /// The caller is not allowed to perform the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A catalog lookup missed.
    #[error("{0} not found")]
    NotFound(String),

    /// A unique constraint was violated.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An upstream connection could not be established or broke mid-call.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The controller refused the operation because it is upgrading.
    #[error("upgrade in progress: {0}")]
    UpgradeInProgress(String),

    /// The requested model is not known to jimm.
    #[error("model {0} not found")]
    ModelNotFound(String),

    /// Credential attributes were expected in the secret store but missing.
    #[error("credential attributes not found for {0}")]
    CredentialAttributesNotFound(String),

    /// The caller's deadline elapsed during a fan-out operation.
    #[error("timed out {0}")]
    TimedOut(String),

    /// An error returned by a backing controller.
    #[error("controller error: {0}")]
    Api(#[from] ApiError),

    /// An error raised by the catalog store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error performing an IO operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error serializing or deserializing a payload.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An error signing or verifying a session token.
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// An error contacting the identity service.
    #[error("identity service error: {0}")]
    Identity(String),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JimmError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            JimmError::Unauthorized(_) => ErrorCode::Unauthorized,
            JimmError::NotFound(_) => ErrorCode::NotFound,
            JimmError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            JimmError::BadRequest(_) => ErrorCode::BadRequest,
            JimmError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            JimmError::UpgradeInProgress(_) => ErrorCode::UpgradeInProgress,
            JimmError::ModelNotFound(_) => ErrorCode::ModelNotFound,
            JimmError::CredentialAttributesNotFound(_) => {
                ErrorCode::CredentialAttributesNotFound
            }
            JimmError::TimedOut(_) => ErrorCode::TimedOut,
            JimmError::Api(e) => e.jimm_code(),
            JimmError::Database(sqlx::Error::RowNotFound) => ErrorCode::NotFound,
            _ => ErrorCode::Internal,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `JimmResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> JimmResult<T> {
    Result::Ok(value)
}
