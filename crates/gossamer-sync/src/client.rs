//! The sync-client role.
//!
//! The client walks the server's merkle tree from the root: wherever the
//! local tree already holds a node with the same coordinates and hash, the
//! whole subtree is identical and is skipped; wherever it differs, the
//! client descends. At the leaf level it collects the entries present on
//! the server but absent locally, fetches them in ascending id
//! order (dependency order, since every parent id precedes its child's)
//! and inserts them. Should an insert still report missing parents, the
//! client backfills those ancestors through nested entry requests before
//! retrying, so the session always lands a causally valid prefix.

use crate::error::SyncError;
use crate::transport::SyncStream;
use crate::wire::{self, SyncRequest, SyncResponse};
use gossamer_core::MessageId;
use gossamer_log::{GossipLog, InsertError};
use tracing::debug;

/// Entries requested per round trip.
const VALUE_BATCH: usize = 64;

/// Bound on nested ancestor fetches within one session.
const MAX_BACKFILL_FETCHES: usize = 1000;

/// What a completed session did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Entries applied locally (ancestor backfills included).
    pub inserted: usize,
    /// Request/response round trips spent.
    pub round_trips: usize,
}

/// Run one sync session against a server stream, pulling everything the
/// server has that we lack. Completes once the recursive hash comparison
/// finds no further mismatch reachable from the server's root.
pub async fn sync_with(log: &GossipLog, stream: &mut SyncStream) -> Result<SyncOutcome, SyncError> {
    let session = ulid::Ulid::new().to_string();
    let peer = stream.peer.clone();
    let mut round_trips = 0usize;
    debug!(%session, %peer, topic = %log.topic(), "sync session started");

    let remote_root = match request(stream, SyncRequest::GetRoot, &mut round_trips).await? {
        SyncResponse::Root(node) => node,
        _ => return Err(SyncError::UnexpectedResponse),
    };

    // Phase 1: recursive descent over mismatched subtrees, collecting the
    // leaf entries we lack. Runs against one local read snapshot.
    let mut want: Vec<MessageId> = Vec::new();
    {
        let snapshot = log.snapshot().await;
        let local_root = snapshot.merkle_root();
        if local_root == remote_root {
            debug!(%session, %peer, round_trips, "already in sync");
            return Ok(SyncOutcome {
                inserted: 0,
                round_trips,
            });
        }
        let mut stack = vec![remote_root];
        while let Some(node) = stack.pop() {
            if node.level == 0 {
                if let Some(key) = node.key {
                    if !snapshot.contains(&key) {
                        want.push(key);
                    }
                }
                continue;
            }
            let local = snapshot.merkle_node(node.level, node.key);
            if local.map(|n| n.hash) == Some(node.hash) {
                continue;
            }
            let children = match request(
                stream,
                SyncRequest::GetChildren {
                    level: node.level,
                    key: node.key,
                },
                &mut round_trips,
            )
            .await?
            {
                SyncResponse::Children(children) => children,
                _ => return Err(SyncError::UnexpectedResponse),
            };
            stack.extend(children);
        }
    }
    want.sort();

    // Phase 2: fetch and insert in dependency order.
    let mut inserted = 0usize;
    let mut fetches = 0usize;
    for batch in want.chunks(VALUE_BATCH) {
        let values = get_values(stream, batch.to_vec(), &mut round_trips).await?;
        if values.len() != batch.len() {
            return Err(SyncError::EntryUnavailable(batch[values.len().min(batch.len() - 1)]));
        }
        for value in values {
            inserted +=
                insert_with_backfill(log, stream, value, &mut round_trips, &mut fetches).await?;
        }
    }

    debug!(%session, %peer, inserted, round_trips, "sync session complete");
    Ok(SyncOutcome {
        inserted,
        round_trips,
    })
}

/// Insert one entry; on a missing-parent result, fetch the ancestors and
/// insert them first, recursively, then retry.
async fn insert_with_backfill(
    log: &GossipLog,
    stream: &mut SyncStream,
    bytes: Vec<u8>,
    round_trips: &mut usize,
    fetches: &mut usize,
) -> Result<usize, SyncError> {
    let mut inserted = 0usize;
    let mut pending: Vec<Vec<u8>> = vec![bytes];
    while let Some(bytes) = pending.last().cloned() {
        match log.insert_encoded(&bytes).await {
            Ok(_) => {
                pending.pop();
                inserted += 1;
            }
            Err(InsertError::MissingParents(parents)) => {
                *fetches += 1;
                if *fetches > MAX_BACKFILL_FETCHES {
                    return Err(SyncError::BackfillDepthExceeded(parents[0]));
                }
                debug!(missing = parents.len(), "backfilling ancestors");
                let values = get_values(stream, parents.clone(), round_trips).await?;
                if values.len() != parents.len() {
                    return Err(SyncError::EntryUnavailable(parents[0]));
                }
                pending.extend(values);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(inserted)
}

async fn request(
    stream: &mut SyncStream,
    request: SyncRequest,
    round_trips: &mut usize,
) -> Result<SyncResponse, SyncError> {
    stream.send(wire::encode_request(&request)).await?;
    *round_trips += 1;
    let bytes = stream.recv().await.ok_or(SyncError::StreamClosed)?;
    Ok(wire::decode_response(&bytes)?)
}

async fn get_values(
    stream: &mut SyncStream,
    ids: Vec<MessageId>,
    round_trips: &mut usize,
) -> Result<Vec<Vec<u8>>, SyncError> {
    match request(stream, SyncRequest::GetValues { ids }, round_trips).await? {
        SyncResponse::Values(values) => Ok(values),
        _ => Err(SyncError::UnexpectedResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ActiveServerSessions, SyncServer};
    use crate::transport::PeerId;
    use gossamer_core::{DigestSigner, DigestVerifier, Topic};
    use gossamer_log::NoopRuntime;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn new_log() -> Arc<GossipLog> {
        Arc::new(GossipLog::new(
            Topic::new("t"),
            Arc::new(DigestVerifier),
            Arc::new(NoopRuntime),
        ))
    }

    fn stream_pair() -> (SyncStream, SyncStream) {
        let (a_tx, b_rx) = mpsc::channel(64);
        let (b_tx, a_rx) = mpsc::channel(64);
        (
            SyncStream {
                peer: PeerId::new("server"),
                tx: a_tx,
                rx: a_rx,
            },
            SyncStream {
                peer: PeerId::new("client"),
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    async fn run_session(client_log: &GossipLog, server_log: Arc<GossipLog>) -> SyncOutcome {
        let (mut client_stream, server_stream) = stream_pair();
        let server = SyncServer::new(server_log, Arc::new(ActiveServerSessions::new()));
        let session = tokio::spawn(async move { server.serve(server_stream).await });
        let outcome = sync_with(client_log, &mut client_stream).await.unwrap();
        drop(client_stream);
        session.await.unwrap().unwrap();
        outcome
    }

    #[tokio::test]
    async fn test_pull_everything_from_server() {
        let server_log = new_log();
        let client_log = new_log();
        let signer = DigestSigner::new("alice");
        for i in 0..25u8 {
            server_log.append(vec![i], &signer).await.unwrap();
        }

        let outcome = run_session(&client_log, Arc::clone(&server_log)).await;
        assert_eq!(outcome.inserted, 25);
        assert_eq!(client_log.len().await, 25);
        assert_eq!(
            client_log.snapshot().await.merkle_root(),
            server_log.snapshot().await.merkle_root()
        );
    }

    #[tokio::test]
    async fn test_noop_when_already_synced() {
        let server_log = new_log();
        let client_log = new_log();
        let signer = DigestSigner::new("alice");
        let (id, _) = server_log.append(b"x".to_vec(), &signer).await.unwrap();
        let encoded = server_log.encoded(&id).await.unwrap();
        client_log.insert_encoded(&encoded).await.unwrap();

        let outcome = run_session(&client_log, server_log).await;
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.round_trips, 1);
    }

    #[tokio::test]
    async fn test_pull_only_the_difference() {
        let server_log = new_log();
        let client_log = new_log();
        let signer = DigestSigner::new("alice");

        // Shared prefix on both.
        let mut encodings = Vec::new();
        for i in 0..20u8 {
            let (id, _) = server_log.append(vec![i], &signer).await.unwrap();
            encodings.push(server_log.encoded(&id).await.unwrap());
        }
        for encoded in &encodings {
            client_log.insert_encoded(encoded).await.unwrap();
        }
        // Divergence: only the server gets these.
        for i in 20..23u8 {
            server_log.append(vec![i], &signer).await.unwrap();
        }

        let outcome = run_session(&client_log, Arc::clone(&server_log)).await;
        assert_eq!(outcome.inserted, 3);
        assert_eq!(client_log.len().await, 23);
        assert_eq!(
            client_log.heads().await,
            server_log.heads().await
        );
    }

    #[tokio::test]
    async fn test_concurrent_branches_converge_after_both_directions() {
        let log_a = new_log();
        let log_b = new_log();
        let alice = DigestSigner::new("alice");
        let bob = DigestSigner::new("bob");

        log_a.append(b"from-a".to_vec(), &alice).await.unwrap();
        log_b.append(b"from-b".to_vec(), &bob).await.unwrap();

        run_session(&log_a, Arc::clone(&log_b)).await;
        run_session(&log_b, Arc::clone(&log_a)).await;

        assert_eq!(log_a.len().await, 2);
        assert_eq!(log_b.len().await, 2);
        assert_eq!(log_a.heads().await, log_b.heads().await);
        assert_eq!(
            log_a.snapshot().await.merkle_root(),
            log_b.snapshot().await.merkle_root()
        );
    }
}
