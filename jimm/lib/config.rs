//! Daemon configuration types and helpers.

use std::path::{Path, PathBuf};

use getset::Getters;
use serde::{Deserialize, Serialize};
use tokio::fs;
use typed_builder::TypedBuilder;

use crate::JimmResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The jimm daemon configuration, loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct JimmConfig {
    /// The uuid jimm presents itself under to clients.
    pub(crate) controller_uuid: String,

    /// Path to the catalog database file.
    pub(crate) database_path: PathBuf,

    /// Root directory of the secret store. When unset, credential
    /// attributes and controller passwords are kept in the catalog.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option))]
    pub(crate) secret_store_root: Option<PathBuf>,

    /// Identity service configuration.
    pub(crate) identity: IdentityConfig,

    /// Secret used to sign session tokens.
    pub(crate) token_signing_secret: String,

    /// Lifetime of session tokens, in seconds.
    #[serde(default = "JimmConfig::default_token_ttl_secs")]
    #[builder(default = JimmConfig::default_token_ttl_secs())]
    pub(crate) token_ttl_secs: u64,
}

/// Connection details for the external identity service that discharges
/// login macaroons.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct IdentityConfig {
    /// Base URL of the identity service.
    pub(crate) url: String,

    /// The identity service's public key, used in third-party caveats.
    pub(crate) public_key: String,

    /// The location written into macaroons minted by this server.
    pub(crate) location: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JimmConfig {
    /// Reads and parses the configuration file at the given path.
    pub async fn load(path: impl AsRef<Path>) -> JimmResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).await?;
        let config: JimmConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::JimmError::BadRequest(format!("invalid config: {}", e)))?;
        Ok(config)
    }

    fn default_token_ttl_secs() -> u64 {
        crate::utils::SESSION_TOKEN_TTL.as_secs()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
