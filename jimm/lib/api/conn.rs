use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::ControllerApi;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A reference-counted handle on a live controller connection.
///
/// Cloning borrows the connection; dropping releases the borrow. The
/// underlying API is closed when the last borrow is released after the
/// cache has evicted the connection.
pub struct Connection {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    controller_uuid: String,
    api: Box<dyn ControllerApi>,
    refs: AtomicUsize,
    evicted: AtomicBool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Connection {
    /// Wraps a freshly dialed API. The returned handle holds the first
    /// borrow.
    pub fn new(controller_uuid: impl Into<String>, api: Box<dyn ControllerApi>) -> Self {
        Connection {
            inner: Arc::new(ConnInner {
                controller_uuid: controller_uuid.into(),
                api,
                refs: AtomicUsize::new(1),
                evicted: AtomicBool::new(false),
            }),
        }
    }

    /// The uuid of the controller this connection talks to.
    pub fn controller_uuid(&self) -> &str {
        &self.inner.controller_uuid
    }

    /// The controller API carried by this connection.
    pub fn api(&self) -> &dyn ControllerApi {
        self.inner.api.as_ref()
    }

    /// Marks the connection for teardown once the last borrow is released.
    pub(crate) fn mark_evicted(&self) {
        self.inner.evicted.store(true, Ordering::SeqCst);
    }

    /// Whether the cache has evicted this connection.
    pub fn is_evicted(&self) -> bool {
        self.inner.evicted.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        self.inner.refs.load(Ordering::SeqCst)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Clone for Connection {
    fn clone(&self) -> Self {
        self.inner.refs.fetch_add(1, Ordering::SeqCst);
        Connection {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let remaining = self.inner.refs.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.inner.evicted.load(Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            // Teardown must not block the dropping task.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    inner.api.close().await;
                });
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("controller_uuid", &self.inner.controller_uuid)
            .field("refs", &self.inner.refs.load(Ordering::SeqCst))
            .field("evicted", &self.inner.evicted.load(Ordering::SeqCst))
            .finish()
    }
}
