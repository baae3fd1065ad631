//! Per-controller model summary watchers.
//!
//! For each public, reachable controller a loop opens the all-model summary
//! watcher and forwards each batch to the hub, folding counts and status
//! into the catalog. On error the loop closes the upstream connection,
//! sleeps with backoff and reopens.

use std::sync::Arc;

use tokio::sync::watch;

use crate::db::Controller;
use crate::engine::Jimm;
use crate::names::Tag;
use crate::utils::{WATCHER_BACKOFF_INITIAL, WATCHER_BACKOFF_MAX};
use crate::{ErrorCode, JimmResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs the model summary watcher loops.
#[derive(Debug, Clone)]
pub struct Watcher {
    jimm: Arc<Jimm>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Watcher {
    /// Creates a watcher over the engine.
    pub fn new(jimm: Arc<Jimm>) -> Self {
        Watcher { jimm }
    }

    /// Starts one watcher loop per public, non-deprecated controller and
    /// waits for all of them to stop. Send `true` on the stop channel to
    /// shut the loops down.
    pub async fn run(&self, stop: watch::Receiver<bool>) -> JimmResult<()> {
        let controllers = self.jimm.database().list_controllers().await?;
        let mut handles = Vec::new();
        for controller in controllers
            .into_iter()
            .filter(|c| c.public && !c.deprecated)
        {
            let jimm = Arc::clone(&self.jimm);
            let stop = stop.clone();
            handles.push(tokio::spawn(async move {
                watch_controller(jimm, controller, stop).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Runs the watcher loop for a single controller until stopped.
    pub async fn watch_controller_named(
        &self,
        controller_name: &str,
        stop: watch::Receiver<bool>,
    ) -> JimmResult<()> {
        let controller = self.jimm.database().get_controller(controller_name).await?;
        watch_controller(Arc::clone(&self.jimm), controller, stop).await;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn watch_controller(
    jimm: Arc<Jimm>,
    controller: Controller,
    mut stop: watch::Receiver<bool>,
) {
    let mut backoff = WATCHER_BACKOFF_INITIAL;
    loop {
        if *stop.borrow() {
            return;
        }
        match watch_once(&jimm, &controller, &mut stop).await {
            Ok(()) => return,
            Err(e) => {
                tracing::error!(
                    controller = %controller.name, error = %e,
                    "model summary watcher failed"
                );
                if e.code() == ErrorCode::ConnectionFailed {
                    if let Err(derr) = jimm
                        .database()
                        .set_controller_unavailable(&controller.name)
                        .await
                    {
                        tracing::error!(
                            controller = %controller.name, error = %derr,
                            "failed to mark controller unavailable"
                        );
                    }
                }
                jimm.cache().evict(&controller.uuid);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop.changed() => {
                if *stop.borrow() {
                    return;
                }
            }
        }
        backoff = std::cmp::min(backoff * 2, WATCHER_BACKOFF_MAX);
    }
}

async fn watch_once(
    jimm: &Arc<Jimm>,
    controller: &Controller,
    stop: &mut watch::Receiver<bool>,
) -> JimmResult<()> {
    let conn = jimm.cache().open(controller).await?;
    jimm.database()
        .controller_seen(&controller.name, None)
        .await?;

    if !conn.api().supports_model_summary_watcher() {
        tracing::info!(
            controller = %controller.name,
            "controller does not support the model summary watcher"
        );
        return Ok(());
    }
    let watcher_id = conn.api().watch_all_model_summaries().await?;

    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    if let Err(e) = conn.api().model_summary_watcher_stop(&watcher_id).await {
                        tracing::warn!(
                            controller = %controller.name, error = %e,
                            "failed to stop model summary watcher"
                        );
                    }
                    return Ok(());
                }
            }
            next = conn.api().model_summary_watcher_next(&watcher_id) => {
                let mut summaries = next?;
                // Deterministic per-batch ordering by model uuid.
                summaries.sort_by(|a, b| a.uuid.cmp(&b.uuid));
                for summary in summaries {
                    apply_summary(jimm, &summary).await;
                    jimm.hub().publish(summary);
                }
                jimm.database().controller_seen(&controller.name, None).await?;
            }
        }
    }
}

/// Folds one summary into the catalog. Models the controller reports as
/// dead are hard-deleted together with their relation tuples.
async fn apply_summary(jimm: &Arc<Jimm>, summary: &crate::api::ModelSummary) {
    let model = match jimm.database().get_model_by_uuid(&summary.uuid).await {
        Ok(Some(model)) => model,
        Ok(None) => return,
        Err(e) => {
            tracing::error!(model = %summary.uuid, error = %e, "failed to load model for summary");
            return;
        }
    };

    if summary.status == "dead" {
        if let Err(e) = jimm.database().delete_model(model.id).await {
            tracing::error!(model = %summary.uuid, error = %e, "failed to delete dead model");
            return;
        }
        if let Err(e) = jimm
            .checker()
            .remove_target(Tag::model(summary.uuid.clone()))
            .await
        {
            tracing::error!(model = %summary.uuid, error = %e, "failed to remove model relations");
        }
        jimm.hub().remove(&summary.uuid);
        return;
    }

    if let Err(e) = jimm
        .database()
        .set_model_counts(
            &summary.uuid,
            summary.machine_count,
            summary.core_count,
            summary.unit_count,
        )
        .await
    {
        tracing::error!(model = %summary.uuid, error = %e, "failed to store model counts");
    }
}
