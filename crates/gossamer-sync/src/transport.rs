//! Network transport capability.
//!
//! [`Transport`] is the narrow contract the sync layer needs from a
//! network stack: datagram frames to connected peers, bidirectional
//! streams for sync sessions, and topic membership with join
//! notifications. [`MemoryTransport`] wires transports together in
//! process, for tests and simulation.

use async_trait::async_trait;
use gossamer_core::Topic;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 256;

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport error type.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Stream closed")]
    StreamClosed,
}

/// A bidirectional byte-frame stream for one sync session.
///
/// `peer` is the party at the other end. Dropping either half ends the
/// session.
pub struct SyncStream {
    pub peer: PeerId,
    pub tx: mpsc::Sender<Vec<u8>>,
    pub rx: mpsc::Receiver<Vec<u8>>,
}

impl SyncStream {
    /// Send one frame.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Receive the next frame, or `None` when the peer hung up.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// A stream opened towards us by a peer.
pub struct IncomingStream {
    pub topic: Topic,
    pub stream: SyncStream,
}

/// A peer joined a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicEvent {
    pub peer: PeerId,
    pub topic: Topic,
}

/// Abstract network transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Our own peer id.
    fn local_id(&self) -> &PeerId;

    /// Subscribe to a topic and announce the membership to peers.
    async fn join(&self, topic: &Topic);

    /// Send a datagram frame to a specific peer.
    async fn send(&self, peer: &PeerId, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Connected peers subscribed to a topic.
    async fn peers_for(&self, topic: &Topic) -> Vec<PeerId>;

    /// Open a sync stream towards a peer for a topic.
    async fn open_stream(&self, peer: &PeerId, topic: &Topic)
        -> Result<SyncStream, TransportError>;

    /// Incoming datagram frames. Can only be taken once.
    fn frames(&self) -> mpsc::Receiver<(PeerId, Vec<u8>)>;

    /// Incoming sync streams. Can only be taken once.
    fn incoming_streams(&self) -> mpsc::Receiver<IncomingStream>;

    /// Topic membership notifications from peers. Can only be taken once.
    fn topic_events(&self) -> mpsc::Receiver<TopicEvent>;
}

/// The senders a peer uses to reach us.
#[derive(Clone)]
struct Inbox {
    frame_tx: mpsc::Sender<(PeerId, Vec<u8>)>,
    stream_tx: mpsc::Sender<IncomingStream>,
    topic_tx: mpsc::Sender<TopicEvent>,
    topics: Arc<RwLock<HashSet<Topic>>>,
}

/// In-memory transport for testing and simulation.
pub struct MemoryTransport {
    local_id: PeerId,
    inbox: Inbox,
    frame_rx: Mutex<Option<mpsc::Receiver<(PeerId, Vec<u8>)>>>,
    stream_rx: Mutex<Option<mpsc::Receiver<IncomingStream>>>,
    topic_rx: Mutex<Option<mpsc::Receiver<TopicEvent>>>,
    peers: RwLock<HashMap<PeerId, Inbox>>,
}

impl MemoryTransport {
    pub fn new(local_id: PeerId) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stream_tx, stream_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (topic_tx, topic_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            local_id,
            inbox: Inbox {
                frame_tx,
                stream_tx,
                topic_tx,
                topics: Arc::new(RwLock::new(HashSet::new())),
            },
            frame_rx: Mutex::new(Some(frame_rx)),
            stream_rx: Mutex::new(Some(stream_rx)),
            topic_rx: Mutex::new(Some(topic_rx)),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Connect two memory transports together (for testing).
    pub fn connect_to(&self, other: &MemoryTransport) {
        self.peers
            .write()
            .insert(other.local_id.clone(), other.inbox.clone());
        other
            .peers
            .write()
            .insert(self.local_id.clone(), self.inbox.clone());
    }

    fn inbox_of(&self, peer: &PeerId) -> Result<Inbox, TransportError> {
        self.peers
            .read()
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::PeerNotFound(peer.clone()))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    async fn join(&self, topic: &Topic) {
        self.inbox.topics.write().insert(topic.clone());
        let inboxes: Vec<Inbox> = self.peers.read().values().cloned().collect();
        for inbox in inboxes {
            let _ = inbox
                .topic_tx
                .send(TopicEvent {
                    peer: self.local_id.clone(),
                    topic: topic.clone(),
                })
                .await;
        }
    }

    async fn send(&self, peer: &PeerId, frame: Vec<u8>) -> Result<(), TransportError> {
        let inbox = self.inbox_of(peer)?;
        inbox
            .frame_tx
            .send((self.local_id.clone(), frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn peers_for(&self, topic: &Topic) -> Vec<PeerId> {
        self.peers
            .read()
            .iter()
            .filter(|(_, inbox)| inbox.topics.read().contains(topic))
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn open_stream(
        &self,
        peer: &PeerId,
        topic: &Topic,
    ) -> Result<SyncStream, TransportError> {
        let inbox = self.inbox_of(peer)?;
        let (client_tx, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (server_tx, server_rx) = mpsc::channel(CHANNEL_CAPACITY);
        inbox
            .stream_tx
            .send(IncomingStream {
                topic: topic.clone(),
                stream: SyncStream {
                    peer: self.local_id.clone(),
                    tx: server_tx,
                    rx: client_rx,
                },
            })
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(SyncStream {
            peer: peer.clone(),
            tx: client_tx,
            rx: server_rx,
        })
    }

    fn frames(&self) -> mpsc::Receiver<(PeerId, Vec<u8>)> {
        self.frame_rx
            .lock()
            .take()
            .expect("frames can only be taken once")
    }

    fn incoming_streams(&self) -> mpsc::Receiver<IncomingStream> {
        self.stream_rx
            .lock()
            .take()
            .expect("incoming_streams can only be taken once")
    }

    fn topic_events(&self) -> mpsc::Receiver<TopicEvent> {
        self.topic_rx
            .lock()
            .take()
            .expect("topic_events can only be taken once")
    }
}

/// Create a fully connected network of memory transports for testing.
pub fn create_network(count: usize) -> Vec<MemoryTransport> {
    let transports: Vec<_> = (0..count)
        .map(|i| MemoryTransport::new(PeerId::new(format!("peer-{}", i))))
        .collect();
    for i in 0..count {
        for j in (i + 1)..count {
            transports[i].connect_to(&transports[j]);
        }
    }
    transports
}
