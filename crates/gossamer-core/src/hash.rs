//! Content digests.
//!
//! SHA-256 digests are used throughout Gossamer: as the hash suffix of
//! message ids, as merkle node hashes, and as record ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }

    /// The underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The all-zero digest, used as the hash of empty merkle anchors.
    pub fn zero() -> Self {
        Digest([0u8; 32])
    }

    /// Hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Truncated hex rendering for logs (first 8 chars).
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}...)", self.short())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-256 hasher.
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher {
            inner: Sha256::new(),
        }
    }

    /// Feed raw bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Feed a length-prefixed field, so adjacent variable-length fields
    /// cannot alias each other.
    pub fn update_field(&mut self, data: &[u8]) {
        self.inner.update((data.len() as u64).to_be_bytes());
        self.inner.update(data);
    }

    pub fn finalize(self) -> Digest {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&self.inner.finalize());
        Digest(bytes)
    }

    /// Digest a single buffer.
    pub fn digest(data: &[u8]) -> Digest {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
