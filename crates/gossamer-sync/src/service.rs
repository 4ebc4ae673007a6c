//! The per-topic sync service.
//!
//! Wires the three replication components of one topic together: the
//! server accept loop answering peers' sync sessions, the scheduler
//! driving our own client sessions, and the push channel for eager
//! dissemination.

use crate::push::PushChannel;
use crate::scheduler::{SchedulerHandle, SyncConfig, SyncEvent, SyncReason, SyncScheduler};
use crate::server::{ActiveServerSessions, SyncServer};
use crate::transport::{PeerId, Transport};
use gossamer_log::GossipLog;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Pairwise anti-entropy and push replication for one topic.
pub struct SyncService {
    scheduler: SchedulerHandle,
    push: Option<PushChannel>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncService {
    /// Join the topic and start serving, scheduling and pushing.
    pub async fn start(
        log: Arc<GossipLog>,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> SyncService {
        let topic = log.topic().clone();
        transport.join(&topic).await;
        info!(%topic, peer = %transport.local_id(), "sync service started");

        let active = Arc::new(ActiveServerSessions::new());
        let server = SyncServer::new(Arc::clone(&log), Arc::clone(&active));
        let mut incoming = transport.incoming_streams();
        let accept_topic = topic.clone();
        let accept = tokio::spawn(async move {
            while let Some(stream) = incoming.recv().await {
                if stream.topic != accept_topic {
                    continue;
                }
                let server = server.clone();
                tokio::spawn(async move {
                    if let Err(error) = server.serve(stream.stream).await {
                        debug!(%error, "server session ended with error");
                    }
                });
            }
        });

        let (scheduler, scheduler_task) =
            SyncScheduler::spawn(Arc::clone(&log), Arc::clone(&transport), active, config);
        let push = PushChannel::spawn(log, transport, scheduler.clone());

        SyncService {
            scheduler,
            push: Some(push),
            tasks: vec![accept, scheduler_task],
        }
    }

    /// Request a sync with a peer.
    pub fn request_sync(&self, peer: PeerId, reason: SyncReason) {
        self.scheduler.request_sync(peer, reason);
    }

    /// The scheduler handle, for wiring into other components.
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Subscribe to sync lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.scheduler.subscribe()
    }

    /// Stop all tasks.
    pub fn shutdown(mut self) {
        if let Some(push) = self.push.take() {
            push.shutdown();
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
