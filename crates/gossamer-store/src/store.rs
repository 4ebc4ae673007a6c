//! Message storage and ancestry queries.
//!
//! [`MessageStore`] is the logical contract for the `$messages`, `$heads`
//! and `$ancestors` tables: content-addressed signed messages, the current
//! frontier, and parent links for reachability queries. Backends implement
//! it over whatever engine they like; [`MemoryMessageStore`] is the bundled
//! in-memory implementation.

use gossamer_core::{Message, MessageId, Signature};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

/// Errors from message storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Some of a message's parents are not present locally. This is a
    /// control-flow signal, not a permanent failure: the caller is expected
    /// to backfill the ancestors and retry.
    #[error("Missing parents: {}", format_ids(.0))]
    MissingParents(Vec<MessageId>),

    /// Backend I/O failure. Fatal to the topic's log.
    #[error("Storage failure: {0}")]
    Io(String),
}

fn format_ids(ids: &[MessageId]) -> String {
    ids.iter()
        .map(|id| id.short())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A stored signed message: the decoded parts plus the exact wire bytes the
/// id was derived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub signature: Signature,
    pub message: Message,
    pub encoded: Vec<u8>,
}

/// Contract for the message tables of one topic.
pub trait MessageStore {
    /// Insert a message. Returns `Ok(true)` if newly inserted, `Ok(false)`
    /// if the id was already present (idempotent by id), and
    /// `Err(StoreError::MissingParents)` if any parent is absent, in which
    /// case nothing is stored.
    ///
    /// On success the head set is updated atomically: the message's parents
    /// leave the frontier and the new id joins it.
    fn insert(&mut self, id: MessageId, stored: StoredMessage) -> Result<bool, StoreError>;

    /// Fetch a stored message by id.
    fn get(&self, id: &MessageId) -> Option<&StoredMessage>;

    /// Whether the id is present.
    fn contains(&self, id: &MessageId) -> bool;

    /// The current frontier, ascending.
    fn heads(&self) -> Vec<MessageId>;

    /// Parent links of a stored message.
    fn parents_of(&self, id: &MessageId) -> Option<&[MessageId]>;

    /// All stored ids, ascending.
    fn ids(&self) -> Vec<MessageId>;

    /// Number of stored messages.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is reachable from `roots` (a root itself counts).
    ///
    /// Walks parent links backwards, pruning any branch whose clock is not
    /// above the target's: ancestors always carry strictly smaller clocks,
    /// so nothing below the target can lead to it. The embedded clock in
    /// every id makes the scan terminate without loading messages.
    fn is_ancestor(&self, roots: &[MessageId], id: &MessageId) -> bool {
        let target_clock = id.clock();
        let mut queue: Vec<MessageId> = Vec::new();
        for root in roots {
            if root == id {
                return true;
            }
            if root.clock() > target_clock {
                queue.push(*root);
            }
        }
        let mut visited: HashSet<MessageId> = queue.iter().copied().collect();
        while let Some(current) = queue.pop() {
            let Some(parents) = self.parents_of(&current) else {
                continue;
            };
            for parent in parents {
                if parent == id {
                    return true;
                }
                if parent.clock() > target_clock && visited.insert(*parent) {
                    queue.push(*parent);
                }
            }
        }
        false
    }
}

/// In-memory implementation of [`MessageStore`].
#[derive(Clone, Debug, Default)]
pub struct MemoryMessageStore {
    messages: BTreeMap<MessageId, StoredMessage>,
    heads: BTreeSet<MessageId>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryMessageStore {
    fn insert(&mut self, id: MessageId, stored: StoredMessage) -> Result<bool, StoreError> {
        if self.messages.contains_key(&id) {
            return Ok(false);
        }

        let missing: Vec<MessageId> = stored
            .message
            .parents
            .iter()
            .filter(|p| !self.messages.contains_key(p))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::MissingParents(missing));
        }

        for parent in &stored.message.parents {
            self.heads.remove(parent);
        }
        self.heads.insert(id);
        self.messages.insert(id, stored);
        Ok(true)
    }

    fn get(&self, id: &MessageId) -> Option<&StoredMessage> {
        self.messages.get(id)
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.messages.contains_key(id)
    }

    fn heads(&self) -> Vec<MessageId> {
        self.heads.iter().copied().collect()
    }

    fn parents_of(&self, id: &MessageId) -> Option<&[MessageId]> {
        self.messages.get(id).map(|s| s.message.parents.as_slice())
    }

    fn ids(&self) -> Vec<MessageId> {
        self.messages.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossamer_core::{codec, DigestSigner, Signer, Topic};

    fn make(parents: Vec<MessageId>, payload: &[u8]) -> (MessageId, StoredMessage) {
        let message = Message::on_parents(Topic::new("t"), parents, payload.to_vec());
        let signer = DigestSigner::new("test");
        let signature = signer.sign(&codec::encode_unsigned(&message)).unwrap();
        let encoded = codec::encode_signed(&signature, &message);
        let id = MessageId::derive(message.clock, &encoded);
        (
            id,
            StoredMessage {
                signature,
                message,
                encoded,
            },
        )
    }

    #[test]
    fn test_insert_and_heads() {
        let mut store = MemoryMessageStore::new();
        let (root, stored_root) = make(vec![], b"root");
        assert!(store.insert(root, stored_root).unwrap());
        assert_eq!(store.heads(), vec![root]);

        let (child, stored_child) = make(vec![root], b"child");
        assert!(store.insert(child, stored_child).unwrap());
        assert_eq!(store.heads(), vec![child]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut store = MemoryMessageStore::new();
        let (root, stored) = make(vec![], b"root");
        assert!(store.insert(root, stored.clone()).unwrap());
        assert!(!store.insert(root, stored).unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.heads(), vec![root]);
    }

    #[test]
    fn test_missing_parent_rejected() {
        let mut store = MemoryMessageStore::new();
        let (root, _) = make(vec![], b"root");
        let (child, stored_child) = make(vec![root], b"child");

        let err = store.insert(child, stored_child).unwrap_err();
        assert_eq!(err, StoreError::MissingParents(vec![root]));
        assert!(!store.contains(&child));
        assert!(store.heads().is_empty());
    }

    #[test]
    fn test_concurrent_heads() {
        let mut store = MemoryMessageStore::new();
        let (root, stored_root) = make(vec![], b"root");
        store.insert(root, stored_root).unwrap();

        let (a, stored_a) = make(vec![root], b"a");
        let (b, stored_b) = make(vec![root], b"b");
        store.insert(a, stored_a).unwrap();
        store.insert(b, stored_b).unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.heads(), expected);

        let (merge, stored_merge) = make(vec![a, b], b"merge");
        store.insert(merge, stored_merge).unwrap();
        assert_eq!(store.heads(), vec![merge]);
    }

    #[test]
    fn test_is_ancestor() {
        let mut store = MemoryMessageStore::new();
        let (root, stored_root) = make(vec![], b"root");
        store.insert(root, stored_root).unwrap();
        let (a, stored_a) = make(vec![root], b"a");
        let (b, stored_b) = make(vec![root], b"b");
        store.insert(a, stored_a).unwrap();
        store.insert(b, stored_b).unwrap();
        let (merge, stored_merge) = make(vec![a, b], b"merge");
        store.insert(merge, stored_merge).unwrap();

        assert!(store.is_ancestor(&[merge], &root));
        assert!(store.is_ancestor(&[merge], &a));
        assert!(store.is_ancestor(&[merge], &b));
        assert!(store.is_ancestor(&[merge], &merge));
        assert!(store.is_ancestor(&[a], &root));
        assert!(!store.is_ancestor(&[a], &b));
        assert!(!store.is_ancestor(&[root], &a));
    }
}
