//! Error types for the core layer.

use crate::id::MessageId;
use thiserror::Error;

/// Errors from encoding or decoding wire messages.
///
/// Every variant is a permanent validation failure: a frame that fails to
/// decode is rejected, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported codec version: {0}")]
    UnsupportedVersion(u8),

    #[error("Truncated frame: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Trailing bytes after frame")]
    TrailingBytes,

    #[error("Topic is not valid UTF-8")]
    InvalidTopic,

    #[error("Signature scheme is not valid UTF-8")]
    InvalidScheme,

    #[error("Parents are not in canonical order")]
    UnsortedParents,

    #[error("Parent {parent} does not precede the message clock {clock}")]
    ParentClockViolation { parent: MessageId, clock: u64 },

    #[error("Declared clock {declared} does not match parents (expected {expected})")]
    ClockMismatch { declared: u64, expected: u64 },

    #[error("Field length {len} exceeds limit {limit}")]
    FieldTooLong { len: usize, limit: usize },
}

/// Errors surfaced by a [`Signer`](crate::signer::Signer) capability.
#[derive(Error, Debug, Clone)]
pub enum SignerError {
    #[error("Signing failed: {0}")]
    Failed(String),

    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),
}
