//! Credential lifecycle: validating and propagating cloud credentials to
//! every controller that holds them, and revoking them again.

use std::collections::HashMap;

use futures::stream::{FuturesUnordered, StreamExt};
use typed_builder::TypedBuilder;

use crate::api::UpdateCredentialModelResult;
use crate::db::{CloudCredential, Controller, NewCredential};
use crate::secrets::credential_secret_path;
use crate::{JimmError, JimmResult};

use super::Jimm;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which halves of a credential operation to run. Both by default.
#[derive(Debug, Clone, Copy)]
pub struct CredentialUpdateFlags {
    /// Validate the change against every holding controller before
    /// committing anything.
    pub check: bool,

    /// Commit the change locally and push it to the holding controllers.
    pub update: bool,
}

/// The parameters for updating a credential.
#[derive(Debug, Clone, TypedBuilder)]
pub struct UpdateCredentialArgs {
    /// The cloud the credential authenticates against.
    pub cloud: String,

    /// The owning user's username.
    pub owner: String,

    /// The credential name.
    pub name: String,

    /// The authentication type.
    #[builder(default)]
    pub auth_type: String,

    /// The new attributes.
    #[builder(default)]
    pub attributes: HashMap<String, String>,
}

struct ControllerResult {
    controller: String,
    models: Vec<UpdateCredentialModelResult>,
    error: Option<JimmError>,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for CredentialUpdateFlags {
    fn default() -> Self {
        CredentialUpdateFlags {
            check: true,
            update: true,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Jimm {
    /// Updates a credential: optionally validates the new attributes
    /// against every controller holding the credential, then stores them
    /// and pushes the update to each holding controller concurrently.
    ///
    /// Push failures do not fail the operation; the affected controllers
    /// stay marked for update and the monitor retries.
    pub async fn update_credential(
        &self,
        username: &str,
        args: &UpdateCredentialArgs,
        flags: CredentialUpdateFlags,
    ) -> JimmResult<Vec<UpdateCredentialModelResult>> {
        if username != args.owner && !self.is_jimm_admin(username).await? {
            return Err(JimmError::Unauthorized("unauthorized".to_string()));
        }

        // The holding controllers of the existing credential, if there is
        // one.
        let controllers = match self
            .database
            .get_credential(&args.cloud, &args.owner, &args.name)
            .await
        {
            Ok(credential) => {
                if credential.revoked {
                    return Err(JimmError::BadRequest(
                        "cannot update a revoked credential".to_string(),
                    ));
                }
                self.database.credential_controllers(credential.id).await?
            }
            Err(e) if e.code() == crate::ErrorCode::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        let tagged = crate::api::TaggedCredential {
            path: crate::names::credential_path(&args.cloud, &args.owner, &args.name),
            auth_type: args.auth_type.clone(),
            attributes: args.attributes.clone(),
        };

        let mut models = Vec::new();
        if flags.check {
            models = self.check_credential(&controllers, &tagged).await?;
            if !flags.update {
                return Ok(models);
            }
        }

        // Commit the new attributes: to the secret store when one is
        // configured, otherwise to the catalog.
        let credential = if let Some(store) = &self.secret_store {
            let path = credential_secret_path(&args.cloud, &args.owner, &args.name);
            store.put(&path, args.attributes.clone()).await?;
            self.database
                .upsert_credential(
                    &NewCredential::builder()
                        .cloud(args.cloud.clone())
                        .owner(args.owner.clone())
                        .name(args.name.clone())
                        .auth_type(args.auth_type.clone())
                        .attributes_in_store(true)
                        .valid(true)
                        .build(),
                )
                .await?
        } else {
            self.database
                .upsert_credential(
                    &NewCredential::builder()
                        .cloud(args.cloud.clone())
                        .owner(args.owner.clone())
                        .name(args.name.clone())
                        .auth_type(args.auth_type.clone())
                        .attributes(args.attributes.clone())
                        .valid(true)
                        .build(),
                )
                .await?
        };
        self.database
            .set_credential_update_pending(credential.id)
            .await?;

        let pushed = self.push_credential(&controllers, &credential, &tagged).await;
        if flags.check {
            // The check already collected the affected models; the push
            // result is the authoritative one where it succeeded.
            if !pushed.is_empty() {
                models = pushed;
            }
        } else {
            models = pushed;
        }

        self.audit(
            username,
            "update_credential",
            true,
            serde_json::json!({"credential": &tagged.path}),
        )
        .await;
        Ok(models)
    }

    /// Revokes a credential. With `check` set, revocation is refused while
    /// any model still references the credential; with `update` set, the
    /// revoked flag is stored and every holding controller is told to drop
    /// the credential.
    pub async fn revoke_credential(
        &self,
        username: &str,
        cloud: &str,
        owner: &str,
        name: &str,
        flags: CredentialUpdateFlags,
    ) -> JimmResult<()> {
        if username != owner && !self.is_jimm_admin(username).await? {
            return Err(JimmError::Unauthorized("unauthorized".to_string()));
        }

        let credential = self.database.get_credential(cloud, owner, name).await?;

        if flags.check {
            let in_use = self.database.models_using_credential(credential.id).await?;
            if in_use > 0 {
                return Err(JimmError::BadRequest(
                    "cannot revoke because credential is in use on at least one model"
                        .to_string(),
                ));
            }
        }
        if !flags.update {
            return Ok(());
        }

        self.database.set_credential_revoked(credential.id).await?;
        if let Some(store) = &self.secret_store {
            store
                .delete(&credential_secret_path(cloud, owner, name))
                .await?;
        }

        // Tell every holding controller to drop the credential. Failures
        // are logged; the monitor retries the stragglers.
        let controllers = self.database.credential_controllers(credential.id).await?;
        let path = credential.path();
        let mut tasks: FuturesUnordered<_> = controllers
            .iter()
            .map(|controller| async {
                let result = self.revoke_on_controller(controller, &credential, &path).await;
                ControllerResult {
                    controller: controller.name.clone(),
                    models: Vec::new(),
                    error: result.err(),
                }
            })
            .collect();
        let deadline = tokio::time::Instant::now() + self.fanout_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, tasks.next())
                .await
                .map_err(|_| JimmError::TimedOut("revoking credentials".to_string()))?;
            let Some(result) = next else {
                break;
            };
            if let Some(e) = result.error {
                tracing::warn!(
                    controller = %result.controller, error = %e,
                    "cannot revoke credential"
                );
            }
        }

        self.audit(
            username,
            "revoke_credential",
            true,
            serde_json::json!({"credential": path}),
        )
        .await;
        Ok(())
    }

    /// Validates a credential against every holding controller
    /// concurrently. Any blocking error fails the whole operation.
    async fn check_credential(
        &self,
        controllers: &[Controller],
        tagged: &crate::api::TaggedCredential,
    ) -> JimmResult<Vec<UpdateCredentialModelResult>> {
        if controllers.is_empty() {
            // Nowhere to check the credential against.
            return Ok(Vec::new());
        }
        let mut tasks: FuturesUnordered<_> = controllers
            .iter()
            .map(|controller| async {
                let result = self.check_on_controller(controller, tagged).await;
                match result {
                    Ok(models) => ControllerResult {
                        controller: controller.name.clone(),
                        models,
                        error: None,
                    },
                    Err(e) => ControllerResult {
                        controller: controller.name.clone(),
                        models: Vec::new(),
                        error: Some(e),
                    },
                }
            })
            .collect();

        let deadline = tokio::time::Instant::now() + self.fanout_timeout;
        let mut models = Vec::new();
        let mut first_error: Option<JimmError> = None;
        loop {
            let next = tokio::time::timeout_at(deadline, tasks.next())
                .await
                .map_err(|_| JimmError::TimedOut("checking credentials".to_string()))?;
            let Some(result) = next else {
                break;
            };
            if let Some(e) = result.error {
                tracing::warn!(controller = %result.controller, error = %e, "cannot check credential");
                if first_error.is_none() {
                    first_error = Some(JimmError::BadRequest(format!(
                        "controller {}: {}",
                        result.controller, e
                    )));
                }
                continue;
            }
            for model in &result.models {
                if !model.errors.is_empty() {
                    if first_error.is_none() {
                        first_error = Some(JimmError::BadRequest(format!(
                            "credential is not valid for model {}: {}",
                            model.model_name,
                            model.errors.join("; ")
                        )));
                    }
                }
            }
            models.extend(result.models);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(models),
        }
    }

    /// Pushes an updated credential to every holding controller
    /// concurrently. Failures are logged and left for the monitor.
    async fn push_credential(
        &self,
        controllers: &[Controller],
        credential: &CloudCredential,
        tagged: &crate::api::TaggedCredential,
    ) -> Vec<UpdateCredentialModelResult> {
        let mut tasks: FuturesUnordered<_> = controllers
            .iter()
            .map(|controller| async {
                let result = self.push_to_controller(controller, credential, tagged).await;
                match result {
                    Ok(models) => ControllerResult {
                        controller: controller.name.clone(),
                        models,
                        error: None,
                    },
                    Err(e) => ControllerResult {
                        controller: controller.name.clone(),
                        models: Vec::new(),
                        error: Some(e),
                    },
                }
            })
            .collect();

        let mut models = Vec::new();
        while let Some(result) = tasks.next().await {
            if let Some(e) = result.error {
                tracing::warn!(
                    controller = %result.controller, error = %e,
                    "cannot update credential"
                );
                continue;
            }
            models.extend(result.models);
        }
        models
    }

    async fn check_on_controller(
        &self,
        controller: &Controller,
        tagged: &crate::api::TaggedCredential,
    ) -> JimmResult<Vec<UpdateCredentialModelResult>> {
        let conn = self.dial(controller).await?;
        if !conn.api().supports_check_credential_models() {
            // Without cloud facade v3 there is nothing to check.
            return Ok(Vec::new());
        }
        let models = conn.api().check_credential_models(tagged).await?;
        Ok(models)
    }

    async fn push_to_controller(
        &self,
        controller: &Controller,
        credential: &CloudCredential,
        tagged: &crate::api::TaggedCredential,
    ) -> JimmResult<Vec<UpdateCredentialModelResult>> {
        let conn = self.dial(controller).await?;
        let models = conn.api().update_credential(tagged).await?;
        self.database
            .clear_credential_update(credential.id, controller.id)
            .await?;
        Ok(models)
    }

    async fn revoke_on_controller(
        &self,
        controller: &Controller,
        credential: &CloudCredential,
        path: &str,
    ) -> JimmResult<()> {
        let conn = self.dial(controller).await?;
        conn.api().revoke_credential(path).await?;
        self.database
            .clear_credential_update(credential.id, controller.id)
            .await?;
        Ok(())
    }
}
