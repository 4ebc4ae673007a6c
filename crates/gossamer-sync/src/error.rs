//! Error types for the sync layer.

use crate::transport::TransportError;
use crate::wire::WireError;
use gossamer_core::MessageId;
use gossamer_log::InsertError;
use thiserror::Error;

/// Errors ending a sync session.
///
/// Sessions that fail are abandoned and retried later by the scheduler;
/// they are never fatal to other topics or peers.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer hung up mid-session.
    #[error("Stream closed by peer")]
    StreamClosed,

    /// The peer answered a request with the wrong response kind.
    #[error("Unexpected response from peer")]
    UnexpectedResponse,

    /// The peer advertised an entry it would not serve.
    #[error("Peer did not serve entry {0}")]
    EntryUnavailable(MessageId),

    /// Ancestor backfill recursed past the depth bound.
    #[error("Backfill depth exceeded at {0}")]
    BackfillDepthExceeded(MessageId),

    /// Inserting a received entry failed for a reason other than missing
    /// parents (those trigger backfill instead).
    #[error(transparent)]
    Insert(#[from] InsertError),

    /// The per-session timeout elapsed.
    #[error("Session timed out")]
    Timeout,
}
