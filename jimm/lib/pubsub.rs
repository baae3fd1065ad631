//! An in-process hub publishing model summaries, one topic per model uuid.
//!
//! Publication is last-write-wins with no durability: a subscriber sees the
//! most recent summary at subscription time and every one published after.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::api::ModelSummary;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The model summary hub.
#[derive(Debug, Default)]
pub struct Hub {
    topics: Mutex<HashMap<String, watch::Sender<Option<ModelSummary>>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Hub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Hub::default()
    }

    /// Publishes a summary on its model's topic.
    pub fn publish(&self, summary: ModelSummary) {
        let mut topics = self.topics.lock().expect("hub poisoned");
        let sender = topics
            .entry(summary.uuid.clone())
            .or_insert_with(|| watch::channel(None).0);
        sender.send_replace(Some(summary));
    }

    /// Subscribes to a model's topic. The receiver immediately holds the
    /// latest published summary, if there is one.
    pub fn subscribe(&self, model_uuid: &str) -> watch::Receiver<Option<ModelSummary>> {
        let mut topics = self.topics.lock().expect("hub poisoned");
        topics
            .entry(model_uuid.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Drops a model's topic, disconnecting its subscribers.
    pub fn remove(&self, model_uuid: &str) {
        let mut topics = self.topics.lock().expect("hub poisoned");
        topics.remove(model_uuid);
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
