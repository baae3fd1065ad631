//! The model request dispatcher: resolves the hosting controller for a
//! model, authorizes the caller at the desired level, borrows a connection
//! from the cache and forwards the call, rewriting identities between
//! jimm's namespace and the controller's.

use std::future::Future;
use std::sync::Arc;

use crate::api::{ApiResult, Connection, ModelInfo, ModelUserInfo};
use crate::engine::{AccessLevel, Jimm};
use crate::names::is_external_user;
use crate::{JimmError, JimmResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Dispatches model-scoped requests to the hosting controller.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    jimm: Arc<Jimm>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Dispatcher {
    /// Creates a dispatcher over the engine.
    pub fn new(jimm: Arc<Jimm>) -> Self {
        Dispatcher { jimm }
    }

    /// Resolves the model, authorizes the caller at the desired access
    /// level, borrows a connection to the hosting controller and runs the
    /// forwarded call against it.
    ///
    /// A transport failure (an error the controller assigned no code to)
    /// evicts the connection and surfaces as `ConnectionFailed`.
    pub async fn with_model_connection<T, F, Fut>(
        &self,
        username: &str,
        model_uuid: &str,
        desired: AccessLevel,
        forward: F,
    ) -> JimmResult<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let model = self.jimm.require_model(model_uuid).await?;
        if !self.jimm.is_jimm_admin(username).await?
            && !self
                .jimm
                .check_model_access(username, &model, desired)
                .await?
        {
            return Err(JimmError::Unauthorized("unauthorized".to_string()));
        }

        let controller = self
            .jimm
            .database()
            .get_controller(&model.controller_name)
            .await?;
        let conn = self.jimm.dial(&controller).await?;

        match forward(conn.clone()).await {
            Ok(value) => Ok(value),
            Err(e) if e.code.is_none() => {
                // Stream errors carry no controller code; drop the broken
                // connection so the next request redials.
                self.jimm.cache().evict(&controller.uuid);
                Err(JimmError::ConnectionFailed(e.message))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forwards a model-info request to the hosting controller, rewriting
    /// the returned identities into jimm's namespace.
    pub async fn proxied_model_info(
        &self,
        username: &str,
        model_uuid: &str,
    ) -> JimmResult<ModelInfo> {
        let mut info = self
            .with_model_connection(username, model_uuid, AccessLevel::Read, |conn| async move {
                conn.api().model_info(model_uuid).await
            })
            .await?;
        rewrite_model_users(&mut info.users);
        Ok(info)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Drops users local to the backing controller from a user list; only
/// identities in jimm's namespace are surfaced to clients.
pub fn rewrite_model_users(users: &mut Vec<ModelUserInfo>) {
    users.retain(|u| is_external_user(&u.username));
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
