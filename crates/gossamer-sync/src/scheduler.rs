//! Sync job scheduling.
//!
//! A bounded job queue drives client sessions against peers. Three things
//! trigger a job: the periodic sweep over every peer subscribed to the
//! topic, a notification that a peer just joined, and a missing-parent
//! failure from a push insert. A duplicate request for a peer with a job
//! outstanding is dropped, a cooldown window suppresses immediately
//! repeated sessions after one completes, and a peer currently being
//! served as sync-server is never dialed as client; that is the deadlock
//! guard.
//! In-flight jobs are held as explicit task handles so they can be
//! cancelled without leaking a lock.

use crate::client::{sync_with, SyncOutcome};
use crate::error::SyncError;
use crate::server::ActiveServerSessions;
use crate::transport::{PeerId, Transport};
use gossamer_core::Topic;
use gossamer_log::GossipLog;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for sync scheduling.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Period of the sweep over all subscribed peers.
    pub sweep_interval: Duration,
    /// Window after a completed session during which further sessions
    /// with the same peer are suppressed.
    pub cooldown: Duration,
    /// Per-session timeout; a session still running after this is
    /// abandoned.
    pub session_timeout: Duration,
    /// Capacity of the trigger queue; requests beyond it are dropped.
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(5),
            session_timeout: Duration::from_secs(30),
            queue_capacity: 64,
        }
    }
}

/// Builder for sync configuration.
#[derive(Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

/// Why a sync with a peer was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncReason {
    /// Periodic sweep.
    Sweep,
    /// The peer just joined the topic.
    PeerJoined,
    /// A pushed message failed to insert for want of its ancestors.
    MissingParent,
    /// The peer's advertised frontier contains heads we lack.
    Behind,
}

/// Why a sync request was dropped instead of started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// A job for this peer is already in flight.
    Outstanding,
    /// The post-session cooldown window is still open.
    Cooldown,
    /// The peer is currently being served as sync-server.
    ServingPeer,
    /// The trigger queue is full.
    QueueFull,
}

/// Notifications from the scheduler.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    Started { peer: PeerId, reason: SyncReason },
    Completed { peer: PeerId, outcome: SyncOutcome },
    Failed { peer: PeerId, error: String },
    Cancelled { peer: PeerId },
    Dropped { peer: PeerId, reason: DropReason },
}

enum Command {
    Trigger { peer: PeerId, reason: SyncReason },
    Cancel { peer: PeerId },
}

/// Handle for requesting syncs and observing scheduler events.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<SyncEvent>,
}

impl SchedulerHandle {
    /// Request a sync with a peer. Non-blocking; dropped with a
    /// [`DropReason::QueueFull`] event if the queue is full.
    pub fn request_sync(&self, peer: PeerId, reason: SyncReason) {
        if self
            .command_tx
            .try_send(Command::Trigger {
                peer: peer.clone(),
                reason,
            })
            .is_err()
        {
            warn!(%peer, "sync trigger queue full, dropping request");
            let _ = self.events.send(SyncEvent::Dropped {
                peer,
                reason: DropReason::QueueFull,
            });
        }
    }

    /// Cancel the in-flight job for a peer, if any.
    pub fn cancel(&self, peer: PeerId) {
        let _ = self.command_tx.try_send(Command::Cancel { peer });
    }

    /// Subscribe to scheduler events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}

/// Spawns and runs the per-topic sync scheduler.
pub struct SyncScheduler;

impl SyncScheduler {
    pub fn spawn(
        log: Arc<GossipLog>,
        transport: Arc<dyn Transport>,
        active: Arc<ActiveServerSessions>,
        config: SyncConfig,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(config.queue_capacity);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handle = SchedulerHandle {
            command_tx,
            events: events.clone(),
        };
        let (done_tx, done_rx) = mpsc::channel(config.queue_capacity);
        let runner = Runner {
            topic: log.topic().clone(),
            log,
            transport,
            active,
            config,
            events,
            done_tx,
            outstanding: HashMap::new(),
            cooldown_until: HashMap::new(),
        };
        let task = tokio::spawn(runner.run(command_rx, done_rx));
        (handle, task)
    }
}

struct Runner {
    topic: Topic,
    log: Arc<GossipLog>,
    transport: Arc<dyn Transport>,
    active: Arc<ActiveServerSessions>,
    config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
    done_tx: mpsc::Sender<(PeerId, Result<SyncOutcome, SyncError>)>,
    outstanding: HashMap<PeerId, JoinHandle<()>>,
    cooldown_until: HashMap<PeerId, Instant>,
}

impl Runner {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut done_rx: mpsc::Receiver<(PeerId, Result<SyncOutcome, SyncError>)>,
    ) {
        let mut topic_events = self.transport.topic_events();
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup does not
        // race subscriptions.
        sweep.tick().await;

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    for peer in self.transport.peers_for(&self.topic).await {
                        self.try_start(peer, SyncReason::Sweep);
                    }
                }
                command = command_rx.recv() => match command {
                    Some(Command::Trigger { peer, reason }) => self.try_start(peer, reason),
                    Some(Command::Cancel { peer }) => self.cancel(peer),
                    None => break,
                },
                Some(event) = topic_events.recv() => {
                    if event.topic == self.topic {
                        self.try_start(event.peer, SyncReason::PeerJoined);
                    }
                }
                Some((peer, result)) = done_rx.recv() => self.finish(peer, result),
            }
        }
    }

    fn try_start(&mut self, peer: PeerId, reason: SyncReason) {
        if self.outstanding.contains_key(&peer) {
            self.drop_request(peer, DropReason::Outstanding);
            return;
        }
        if self.active.contains(&peer) {
            self.drop_request(peer, DropReason::ServingPeer);
            return;
        }
        // A missing parent is a fresh signal of need; everything else
        // respects the cooldown.
        if reason != SyncReason::MissingParent {
            if let Some(until) = self.cooldown_until.get(&peer) {
                if Instant::now() < *until {
                    self.drop_request(peer, DropReason::Cooldown);
                    return;
                }
            }
        }

        debug!(peer = %peer, ?reason, topic = %self.topic, "starting sync job");
        let _ = self.events.send(SyncEvent::Started {
            peer: peer.clone(),
            reason,
        });

        let log = Arc::clone(&self.log);
        let transport = Arc::clone(&self.transport);
        let topic = self.topic.clone();
        let timeout = self.config.session_timeout;
        let done_tx = self.done_tx.clone();
        let job_peer = peer.clone();
        let job = tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, async {
                let mut stream = transport.open_stream(&job_peer, &topic).await?;
                sync_with(&log, &mut stream).await
            })
            .await
            .unwrap_or(Err(SyncError::Timeout));
            let _ = done_tx.send((job_peer, result)).await;
        });
        self.outstanding.insert(peer, job);
    }

    fn cancel(&mut self, peer: PeerId) {
        if let Some(job) = self.outstanding.remove(&peer) {
            job.abort();
            debug!(%peer, "cancelled in-flight sync job");
            let _ = self.events.send(SyncEvent::Cancelled { peer });
        }
    }

    fn finish(&mut self, peer: PeerId, result: Result<SyncOutcome, SyncError>) {
        self.outstanding.remove(&peer);
        self.cooldown_until
            .insert(peer.clone(), Instant::now() + self.config.cooldown);
        match result {
            Ok(outcome) => {
                debug!(%peer, inserted = outcome.inserted, round_trips = outcome.round_trips, "sync job complete");
                let _ = self.events.send(SyncEvent::Completed { peer, outcome });
            }
            Err(error) => {
                warn!(%peer, %error, "sync job failed");
                let _ = self.events.send(SyncEvent::Failed {
                    peer,
                    error: error.to_string(),
                });
            }
        }
    }

    fn drop_request(&self, peer: PeerId, reason: DropReason) {
        debug!(%peer, ?reason, "dropping sync request");
        let _ = self.events.send(SyncEvent::Dropped { peer, reason });
    }
}
