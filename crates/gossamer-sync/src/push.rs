//! Eager push dissemination.
//!
//! Every local append is pushed as a ready-to-insert `{key, value}` pair
//! to every connected peer subscribed to the topic. On receiving a peer's
//! append, the channel replies with an `{heads}` update describing the
//! local frontier, so a sender that is itself behind can open a sync
//! session instead of waiting for further pushes. Push is best-effort
//! throughout: failures are logged and never block local state; the sync
//! service is the correctness backstop.

use crate::scheduler::{SchedulerHandle, SyncEvent, SyncReason};
use crate::transport::{PeerId, Transport};
use crate::wire::{self, PushFrame};
use gossamer_core::{MessageId, Topic};
use gossamer_log::{GossipLog, LogEvent, Origin};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cap on orphaned pushes kept for retry after a sync session.
const MAX_PENDING: usize = 256;

/// The push side of one topic's replication.
pub struct PushChannel {
    tasks: Vec<JoinHandle<()>>,
}

impl PushChannel {
    /// Spawn the outbound (local appends → peers) and inbound (peer
    /// frames → log) pumps.
    pub fn spawn(
        log: Arc<GossipLog>,
        transport: Arc<dyn Transport>,
        scheduler: SchedulerHandle,
    ) -> PushChannel {
        let outbound = tokio::spawn(outbound_pump(Arc::clone(&log), Arc::clone(&transport)));
        let inbound = tokio::spawn(inbound_pump(log, transport, scheduler));
        PushChannel {
            tasks: vec![outbound, inbound],
        }
    }

    pub fn shutdown(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.abort_all();
    }
}

async fn outbound_pump(log: Arc<GossipLog>, transport: Arc<dyn Transport>) {
    let topic = log.topic().clone();
    let mut events = log.subscribe();
    loop {
        match events.recv().await {
            Ok(LogEvent::Message {
                id,
                origin: Origin::Append,
                encoded,
                ..
            }) => {
                let frame = wire::encode_push(&PushFrame::Insert {
                    topic: topic.clone(),
                    key: id,
                    value: (*encoded).clone(),
                });
                let peers = transport.peers_for(&topic).await;
                let sends = peers.iter().map(|peer| transport.send(peer, frame.clone()));
                for (peer, result) in peers.iter().zip(futures::future::join_all(sends).await) {
                    if let Err(error) = result {
                        warn!(%peer, %error, "push send failed");
                    }
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Anything we failed to push eagerly is picked up by the
                // next sync sweep.
                warn!(skipped, "push channel lagged behind log events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn inbound_pump(
    log: Arc<GossipLog>,
    transport: Arc<dyn Transport>,
    scheduler: SchedulerHandle,
) {
    let topic = log.topic().clone();
    let mut frames = transport.frames();
    let mut sync_events = scheduler.subscribe();
    let mut pending = PendingOrphans::new();

    loop {
        tokio::select! {
            maybe = frames.recv() => {
                let Some((peer, bytes)) = maybe else { break };
                handle_frame(&log, &transport, &scheduler, &topic, &mut pending, peer, bytes).await;
            }
            event = sync_events.recv() => {
                if let Ok(SyncEvent::Completed { .. }) = event {
                    pending.retry(&log).await;
                }
            }
        }
    }
}

async fn handle_frame(
    log: &GossipLog,
    transport: &Arc<dyn Transport>,
    scheduler: &SchedulerHandle,
    topic: &Topic,
    pending: &mut PendingOrphans,
    peer: PeerId,
    bytes: Vec<u8>,
) {
    match wire::decode_push(&bytes) {
        Ok(PushFrame::Insert {
            topic: frame_topic,
            key,
            value,
        }) if frame_topic == *topic => match log.insert_encoded(&value).await {
            Ok(id) => {
                if id != key {
                    warn!(%peer, advertised = %key.short(), actual = %id.short(), "push frame key mismatch");
                }
                let update = wire::encode_push(&PushFrame::Update {
                    topic: topic.clone(),
                    heads: log.heads().await,
                });
                if let Err(error) = transport.send(&peer, update).await {
                    warn!(%peer, %error, "heads update send failed");
                }
            }
            Err(e) if e.missing_parents().is_some() => {
                debug!(%peer, id = %key.short(), "pushed message missing parents, scheduling sync");
                pending.park(key, value);
                scheduler.request_sync(peer, SyncReason::MissingParent);
            }
            Err(error) => warn!(%peer, %error, "rejected pushed message"),
        },
        Ok(PushFrame::Update {
            topic: frame_topic,
            heads,
        }) if frame_topic == *topic => {
            let behind = {
                let snapshot = log.snapshot().await;
                heads.iter().any(|head| !snapshot.contains(head))
            };
            if behind {
                debug!(%peer, "peer frontier ahead of ours, scheduling sync");
                scheduler.request_sync(peer, SyncReason::Behind);
            }
        }
        Ok(_) => {} // another topic's frame
        Err(error) => warn!(%peer, %error, "malformed push frame"),
    }
}

/// Pushed messages whose parents were missing, kept to retry once a sync
/// session has backfilled the ancestry.
struct PendingOrphans {
    by_id: HashMap<MessageId, Vec<u8>>,
    order: VecDeque<MessageId>,
}

impl PendingOrphans {
    fn new() -> Self {
        PendingOrphans {
            by_id: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn park(&mut self, id: MessageId, value: Vec<u8>) {
        if self.by_id.insert(id, value).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > MAX_PENDING {
            if let Some(evicted) = self.order.pop_front() {
                self.by_id.remove(&evicted);
            }
        }
    }

    async fn retry(&mut self, log: &GossipLog) {
        let ids: Vec<MessageId> = self.order.iter().copied().collect();
        for id in ids {
            let Some(value) = self.by_id.get(&id) else {
                continue;
            };
            match log.insert_encoded(value).await {
                Ok(_) => {
                    debug!(id = %id.short(), "retried orphan insert succeeded");
                    self.remove(&id);
                }
                Err(e) if e.missing_parents().is_some() => {} // still early
                Err(error) => {
                    warn!(id = %id.short(), %error, "retried orphan insert rejected");
                    self.remove(&id);
                }
            }
        }
    }

    fn remove(&mut self, id: &MessageId) {
        self.by_id.remove(id);
        self.order.retain(|queued| queued != id);
    }
}
