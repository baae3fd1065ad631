use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name jimm presents itself under; the target of jimm-wide
/// administrator relations.
pub const JIMM_CONTROLLER_NAME: &str = "jimm";

/// The synthetic user that represents every authenticated client.
pub const EVERYONE_USER: &str = "everyone@external";

/// Maximum time a single upstream dial may take before the connection
/// attempt is abandoned.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval between address retries within a single upstream dial.
pub const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Page size used when scanning the relation graph, bounding memory during
/// cascading deletes.
pub const RELATION_READ_PAGE_SIZE: i64 = 50;

/// Initial delay before a failed watcher loop redials its controller.
pub const WATCHER_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Ceiling for the watcher redial backoff.
pub const WATCHER_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Sub-path of the secret store under which credential attributes live.
pub const SECRET_CREDS_SUBPATH: &str = "creds";

/// Sub-path of the secret store under which controller admin passwords live.
pub const SECRET_CONTROLLERS_SUBPATH: &str = "controllers";

/// Default lifetime of a session token minted at login.
pub const SESSION_TOKEN_TTL: Duration = Duration::from_secs(300);
