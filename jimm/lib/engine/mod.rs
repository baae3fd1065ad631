//! The federation engine: placement, admin operations, credential
//! propagation and the access computations they share.

mod access;
mod controller;
mod credential;
mod group;
mod model;

use std::sync::Arc;
use std::time::Duration;

use crate::api::ConnectionCache;
use crate::auth::AccessChecker;
use crate::db::{Controller, Database};
use crate::names::Tag;
use crate::pubsub::Hub;
use crate::secrets::SecretStore;
use crate::utils::{Clock, RandSource, JIMM_CONTROLLER_NAME};
use crate::{JimmError, JimmResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use access::*;
pub use controller::*;
pub use credential::*;
pub use model::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The jimm engine. One instance serves every request; all state lives in
/// the catalog, the relation graph and the connection cache.
pub struct Jimm {
    pub(crate) database: Database,
    pub(crate) checker: AccessChecker,
    pub(crate) cache: ConnectionCache,
    pub(crate) secret_store: Option<Arc<dyn SecretStore>>,
    pub(crate) hub: Arc<Hub>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rand: RandSource,
    pub(crate) fanout_timeout: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Jimm {
    /// Creates an engine.
    pub fn new(
        database: Database,
        checker: AccessChecker,
        cache: ConnectionCache,
        secret_store: Option<Arc<dyn SecretStore>>,
        clock: Arc<dyn Clock>,
        rand: RandSource,
    ) -> Self {
        Jimm {
            database,
            checker,
            cache,
            secret_store,
            hub: Arc::new(Hub::new()),
            clock,
            rand,
            fanout_timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the deadline applied to credential fan-out operations.
    pub fn with_fanout_timeout(mut self, timeout: Duration) -> Self {
        self.fanout_timeout = timeout;
        self
    }

    /// The catalog store.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The access checker.
    pub fn checker(&self) -> &AccessChecker {
        &self.checker
    }

    /// The connection cache.
    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// The model summary hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The tag jimm itself is addressed by in the relation graph.
    pub fn resource_tag(&self) -> Tag {
        Tag::controller(JIMM_CONTROLLER_NAME)
    }

    /// Borrows a connection to the given controller from the cache.
    pub(crate) async fn dial(&self, controller: &Controller) -> JimmResult<crate::api::Connection> {
        self.cache.open(controller).await
    }

    /// Appends an audit entry, logging rather than propagating failures.
    pub(crate) async fn audit(
        &self,
        username: &str,
        action: &str,
        success: bool,
        params: serde_json::Value,
    ) {
        if let Err(e) = self
            .database
            .add_audit_entry(username, action, success, &params)
            .await
        {
            tracing::error!(action = action, error = %e, "failed to record audit entry");
        }
    }

    /// Requires the given user to be a jimm administrator.
    pub(crate) async fn require_jimm_admin(&self, username: &str) -> JimmResult<()> {
        if self.is_jimm_admin(username).await? {
            Ok(())
        } else {
            Err(JimmError::Unauthorized("unauthorized".to_string()))
        }
    }

    /// Queries the audit log. Jimm administrators only.
    pub async fn audit_events(
        &self,
        username: &str,
        filter: &crate::db::AuditFilter,
    ) -> JimmResult<Vec<crate::db::AuditEntry>> {
        self.require_jimm_admin(username).await?;
        self.database.audit_entries(filter).await
    }
}

impl std::fmt::Debug for Jimm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jimm").finish_non_exhaustive()
    }
}
