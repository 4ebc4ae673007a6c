//! # gossamer-store
//!
//! Storage for one topic's message set:
//!
//! - [`MessageStore`]: the logical `$messages`/`$heads`/`$ancestors`
//!   contract: content-addressed signed messages, the head frontier, and
//!   parent links for ancestry queries, with [`MemoryMessageStore`] as the
//!   bundled backend
//! - [`MerkleIndex`]: a deterministic merkle search tree over the message
//!   set, the structure the anti-entropy protocol walks to locate the
//!   difference between two replicas
//!
//! Mutation of both structures is expected to happen under the owning
//! log's exclusive writer lock; see `gossamer-log`.

mod merkle;
mod store;

pub use merkle::{IndexNode, MerkleIndex, TARGET_FANOUT};
pub use store::{MemoryMessageStore, MessageStore, StoreError, StoredMessage};
