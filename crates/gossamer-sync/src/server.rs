//! The sync-server role.
//!
//! A server session answers a client's merkle-node and entry requests
//! from a single read snapshot of the local log, held for the whole
//! session so the client walks one consistent tree. While a peer is being
//! served it is registered in the active-session set; the scheduler
//! consults that set and never dials such a peer as sync-client for the
//! same topic, which is what prevents the two replicas from deadlocking
//! on each other's locks.

use crate::error::SyncError;
use crate::transport::{PeerId, SyncStream};
use crate::wire::{self, SyncRequest, SyncResponse};
use gossamer_log::GossipLog;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Peers currently being served as sync-server, per process.
#[derive(Default)]
pub struct ActiveServerSessions {
    counts: Mutex<HashMap<PeerId, usize>>,
}

impl ActiveServerSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a peer has a server session in flight.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.counts.lock().contains_key(peer)
    }
}

fn register(sessions: &Arc<ActiveServerSessions>, peer: PeerId) -> SessionGuard {
    *sessions.counts.lock().entry(peer.clone()).or_insert(0) += 1;
    SessionGuard {
        sessions: Arc::clone(sessions),
        peer,
    }
}

/// Deregisters a server session on every exit path.
struct SessionGuard {
    sessions: Arc<ActiveServerSessions>,
    peer: PeerId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut counts = self.sessions.counts.lock();
        if let Some(count) = counts.get_mut(&self.peer) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.peer);
            }
        }
    }
}

/// Serves merkle anti-entropy sessions from the local log.
#[derive(Clone)]
pub struct SyncServer {
    log: Arc<GossipLog>,
    active: Arc<ActiveServerSessions>,
}

impl SyncServer {
    pub fn new(log: Arc<GossipLog>, active: Arc<ActiveServerSessions>) -> Self {
        SyncServer { log, active }
    }

    /// Serve one session until the client hangs up.
    pub async fn serve(&self, mut stream: SyncStream) -> Result<(), SyncError> {
        let peer = stream.peer.clone();
        let _guard = register(&self.active, peer.clone());
        debug!(topic = %self.log.topic(), %peer, "sync server session started");

        // One consistent snapshot for the whole exchanged range; writers
        // wait until the session ends.
        let snapshot = self.log.snapshot().await;
        let mut requests = 0usize;

        while let Some(bytes) = stream.recv().await {
            let request = match wire::decode_request(&bytes) {
                Ok(request) => request,
                Err(e) => {
                    warn!(%peer, error = %e, "malformed sync request, ending session");
                    return Err(e.into());
                }
            };
            requests += 1;
            let response = match request {
                SyncRequest::GetRoot => SyncResponse::Root(snapshot.merkle_root()),
                SyncRequest::GetChildren { level, key } => {
                    SyncResponse::Children(snapshot.merkle_children(level, key))
                }
                SyncRequest::GetValues { ids } => SyncResponse::Values(
                    ids.iter()
                        .filter_map(|id| snapshot.encoded(id).map(<[u8]>::to_vec))
                        .collect(),
                ),
            };
            stream.send(wire::encode_response(&response)).await?;
        }

        debug!(topic = %self.log.topic(), %peer, requests, "sync server session ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossamer_core::{DigestSigner, DigestVerifier, Topic};
    use gossamer_log::NoopRuntime;
    use tokio::sync::mpsc;

    fn stream_pair(peer_a: &str, peer_b: &str) -> (SyncStream, SyncStream) {
        let (a_tx, b_rx) = mpsc::channel(16);
        let (b_tx, a_rx) = mpsc::channel(16);
        (
            SyncStream {
                peer: PeerId::new(peer_b),
                tx: a_tx,
                rx: a_rx,
            },
            SyncStream {
                peer: PeerId::new(peer_a),
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    #[tokio::test]
    async fn test_serves_root_and_values() {
        let log = Arc::new(GossipLog::new(
            Topic::new("t"),
            Arc::new(DigestVerifier),
            Arc::new(NoopRuntime),
        ));
        let signer = DigestSigner::new("alice");
        let (id, _) = log.append(b"hello".to_vec(), &signer).await.unwrap();
        let expected_root = log.snapshot().await.merkle_root();
        let expected_value = log.encoded(&id).await.unwrap();

        let (mut client, server_stream) = stream_pair("client", "server");
        let server = SyncServer::new(Arc::clone(&log), Arc::new(ActiveServerSessions::new()));
        let session = tokio::spawn(async move { server.serve(server_stream).await });

        client
            .send(wire::encode_request(&SyncRequest::GetRoot))
            .await
            .unwrap();
        let response = wire::decode_response(&client.recv().await.unwrap()).unwrap();
        assert_eq!(response, SyncResponse::Root(expected_root));

        client
            .send(wire::encode_request(&SyncRequest::GetValues { ids: vec![id] }))
            .await
            .unwrap();
        let response = wire::decode_response(&client.recv().await.unwrap()).unwrap();
        assert_eq!(response, SyncResponse::Values(vec![expected_value]));

        drop(client);
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_registers_active_session() {
        let log = Arc::new(GossipLog::new(
            Topic::new("t"),
            Arc::new(DigestVerifier),
            Arc::new(NoopRuntime),
        ));
        let active = Arc::new(ActiveServerSessions::new());
        let server = SyncServer::new(log, Arc::clone(&active));

        let (client, server_stream) = stream_pair("client", "server");
        let peer = server_stream.peer.clone();
        let session = tokio::spawn(async move { server.serve(server_stream).await });

        // Wait until the session registers itself.
        while !active.contains(&peer) {
            tokio::task::yield_now().await;
        }

        drop(client);
        session.await.unwrap().unwrap();
        assert!(!active.contains(&peer));
    }
}
