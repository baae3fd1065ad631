use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::db::Controller;
use crate::secrets::{controller_secret_path, SecretStore};
use crate::utils::{DIAL_RETRY_INTERVAL, DIAL_TIMEOUT};
use crate::{JimmError, JimmResult};

use super::{Connection, ControllerApi};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Produces the [`ControllerApi`] for a controller. The wire client behind
/// it is external to the core.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dials the controller using its addresses and CA certificate,
    /// authenticating with the given admin credentials.
    async fn dial(
        &self,
        controller: &Controller,
        admin_user: &str,
        admin_password: &str,
    ) -> JimmResult<Box<dyn ControllerApi>>;
}

/// A process-wide cache of one live connection per controller uuid, shared
/// by concurrent users.
///
/// Concurrent opens for the same controller collapse into a single dial;
/// the others wait on its outcome. Failures are never cached; a later open
/// redials.
pub struct ConnectionCache {
    dialer: Arc<dyn Dialer>,
    secret_store: Option<Arc<dyn SecretStore>>,
    slots: Mutex<HashMap<String, Slot>>,
    dial_timeout: Duration,
    retry_interval: Duration,
}

type Slot = Arc<tokio::sync::Mutex<Option<Connection>>>;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ConnectionCache {
    /// Creates a cache dialing through the given dialer. Admin credentials
    /// are pulled from the secret store when the controller record says
    /// they live there.
    pub fn new(dialer: Arc<dyn Dialer>, secret_store: Option<Arc<dyn SecretStore>>) -> Self {
        ConnectionCache {
            dialer,
            secret_store,
            slots: Mutex::new(HashMap::new()),
            dial_timeout: DIAL_TIMEOUT,
            retry_interval: DIAL_RETRY_INTERVAL,
        }
    }

    /// Overrides the dial timeout and retry interval, used in tests.
    pub fn with_timeouts(mut self, dial_timeout: Duration, retry_interval: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self.retry_interval = retry_interval;
        self
    }

    /// Returns a borrowed connection to the controller, dialing on a cache
    /// miss.
    pub async fn open(&self, controller: &Controller) -> JimmResult<Connection> {
        let slot = {
            let mut slots = self.slots.lock().expect("connection cache poisoned");
            slots
                .entry(controller.uuid.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
                .clone()
        };

        // The slot lock collapses concurrent dials: the first caller dials
        // while the rest wait here and find the cached connection.
        let mut guard = slot.lock().await;
        if let Some(conn) = guard.as_ref() {
            if !conn.is_evicted() {
                return Ok(conn.clone());
            }
            *guard = None;
        }

        let (admin_user, admin_password) = self.admin_credentials(controller).await?;
        let deadline = Instant::now() + self.dial_timeout;
        let api = self
            .dial_until(controller, &admin_user, &admin_password, deadline)
            .await?;
        api.login().await.map_err(|e| {
            JimmError::ConnectionFailed(format!(
                "cannot log in to controller {}: {}",
                controller.name, e
            ))
        })?;

        let conn = Connection::new(&controller.uuid, api);
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Dials a controller without caching the connection, used when the
    /// controller is not yet in the catalog and has no uuid to key a slot
    /// by. The connection is torn down when the last borrow is released.
    pub async fn open_uncached(&self, controller: &Controller) -> JimmResult<Connection> {
        let (admin_user, admin_password) = self.admin_credentials(controller).await?;
        let deadline = Instant::now() + self.dial_timeout;
        let api = self
            .dial_until(controller, &admin_user, &admin_password, deadline)
            .await?;
        api.login().await.map_err(|e| {
            JimmError::ConnectionFailed(format!(
                "cannot log in to controller {}: {}",
                controller.name, e
            ))
        })?;
        let conn = Connection::new(&controller.uuid, api);
        conn.mark_evicted();
        Ok(conn)
    }

    /// Evicts any cached connection for the controller. In-flight borrows
    /// stay usable; the connection is torn down when the last one is
    /// released.
    pub fn evict(&self, controller_uuid: &str) {
        let slot = {
            let mut slots = self.slots.lock().expect("connection cache poisoned");
            slots.remove(controller_uuid)
        };
        if let Some(slot) = slot {
            if let Ok(mut guard) = slot.try_lock() {
                if let Some(conn) = guard.take() {
                    conn.mark_evicted();
                }
            }
        }
    }

    /// Evicts every cached connection. Used in tests.
    pub fn evict_all(&self) {
        let slots = {
            let mut slots = self.slots.lock().expect("connection cache poisoned");
            std::mem::take(&mut *slots)
        };
        for (_, slot) in slots {
            if let Ok(mut guard) = slot.try_lock() {
                if let Some(conn) = guard.take() {
                    conn.mark_evicted();
                }
            }
        }
    }

    async fn dial_until(
        &self,
        controller: &Controller,
        admin_user: &str,
        admin_password: &str,
        deadline: Instant,
    ) -> JimmResult<Box<dyn ControllerApi>> {
        loop {
            let attempt = tokio::time::timeout_at(
                deadline,
                self.dialer.dial(controller, admin_user, admin_password),
            )
            .await;
            let err = match attempt {
                Ok(Ok(api)) => return Ok(api),
                Ok(Err(e)) => e,
                Err(_) => {
                    return Err(JimmError::ConnectionFailed(format!(
                        "dialing controller {} timed out",
                        controller.name
                    )))
                }
            };
            if Instant::now() + self.retry_interval >= deadline {
                return Err(JimmError::ConnectionFailed(format!(
                    "cannot dial controller {}: {}",
                    controller.name, err
                )));
            }
            tracing::debug!(controller = %controller.name, error = %err, "dial attempt failed, retrying");
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    async fn admin_credentials(&self, controller: &Controller) -> JimmResult<(String, String)> {
        if !controller.credentials_in_store {
            return Ok((
                controller.admin_user.clone(),
                controller.admin_password.clone(),
            ));
        }
        let store = self.secret_store.as_ref().ok_or_else(|| {
            JimmError::ConnectionFailed(format!(
                "controller {} credentials are in the secret store but no store is configured",
                controller.name
            ))
        })?;
        let attributes = store
            .get(&controller_secret_path(&controller.name))
            .await?
            .ok_or_else(|| {
                JimmError::ConnectionFailed(format!(
                    "no stored admin credentials for controller {}",
                    controller.name
                ))
            })?;
        let username = attributes.get("username").cloned().unwrap_or_default();
        let password = attributes.get("password").cloned().unwrap_or_default();
        Ok((username, password))
    }
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("dial_timeout", &self.dial_timeout)
            .finish_non_exhaustive()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
