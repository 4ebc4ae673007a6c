//! Message and record identifiers.
//!
//! A [`MessageId`] is derived from the encoded, signed message. Its first
//! eight bytes are the message's logical clock in big-endian order and the
//! remaining 24 bytes are a SHA-256 prefix of the signed encoding. Because
//! a child's clock is strictly greater than every parent's clock, the
//! derived byte ordering guarantees that every parent id is strictly less
//! than its child's id. Both the merkle diff walk and the view's backward
//! scans rely on this.

use crate::hash::{Digest, Hasher};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte length of a message id: 8 clock bytes + 24 digest bytes.
pub const MESSAGE_ID_LEN: usize = 32;

/// Identifier of a message, totally ordered with the logical clock as the
/// most significant component.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId([u8; MESSAGE_ID_LEN]);

impl MessageId {
    /// Derive the id of a message from its clock and its signed encoding.
    pub fn derive(clock: u64, signed_encoding: &[u8]) -> Self {
        let digest = Hasher::digest(signed_encoding);
        let mut bytes = [0u8; MESSAGE_ID_LEN];
        bytes[..8].copy_from_slice(&clock.to_be_bytes());
        bytes[8..].copy_from_slice(&digest.as_bytes()[..24]);
        MessageId(bytes)
    }

    /// Reconstruct an id from raw bytes (wire decoding).
    pub fn from_bytes(bytes: [u8; MESSAGE_ID_LEN]) -> Self {
        MessageId(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LEN] {
        &self.0
    }

    /// The logical clock embedded in the id.
    pub fn clock(&self) -> u64 {
        let mut clock = [0u8; 8];
        clock.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(clock)
    }

    /// Hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Truncated rendering for logs.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId(clock={}, {}...)", self.clock(), &self.to_hex()[16..24])
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identifier of an application record, derived from `(model, key)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Digest);

impl RecordId {
    /// Derive the record id for a `(model, key)` pair.
    pub fn derive(model: &str, key: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update_field(model.as_bytes());
        hasher.update_field(key.as_bytes());
        RecordId(hasher.finalize())
    }

    pub fn from_digest(digest: Digest) -> Self {
        RecordId(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({}...)", self.0.short())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
