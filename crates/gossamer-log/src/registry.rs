//! Per-topic log registry.
//!
//! Open logs live in an explicit registry with an open/close lifecycle,
//! owned by the embedding application's coordinator, never in ambient
//! module state.

use crate::context::Runtime;
use crate::log::GossipLog;
use gossamer_core::{Topic, Verifier};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Topic '{0}' is already open")]
    AlreadyOpen(Topic),

    #[error("Topic '{0}' is not open")]
    NotOpen(Topic),
}

/// The set of currently open logs.
#[derive(Default)]
pub struct LogRegistry {
    logs: RwLock<HashMap<Topic, Arc<GossipLog>>>,
}

impl LogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a log for a topic. Fails if the topic is already open.
    pub fn open(
        &self,
        topic: Topic,
        verifier: Arc<dyn Verifier>,
        runtime: Arc<dyn Runtime>,
    ) -> Result<Arc<GossipLog>, RegistryError> {
        let mut logs = self.logs.write();
        if logs.contains_key(&topic) {
            return Err(RegistryError::AlreadyOpen(topic));
        }
        let log = Arc::new(GossipLog::new(topic.clone(), verifier, runtime));
        logs.insert(topic, Arc::clone(&log));
        Ok(log)
    }

    /// The open log for a topic, if any.
    pub fn get(&self, topic: &Topic) -> Option<Arc<GossipLog>> {
        self.logs.read().get(topic).cloned()
    }

    /// Close a topic's log. Existing `Arc` holders keep it alive until
    /// they drop; the registry stops handing it out.
    pub fn close(&self, topic: &Topic) -> Result<(), RegistryError> {
        self.logs
            .write()
            .remove(topic)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotOpen(topic.clone()))
    }

    /// Currently open topics.
    pub fn topics(&self) -> Vec<Topic> {
        self.logs.read().keys().cloned().collect()
    }
}
