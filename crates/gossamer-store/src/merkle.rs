//! Merkle search tree over the message set.
//!
//! The index keys every stored message id to a hash of its wire encoding
//! and arranges them as a deterministic merkle search tree: two replicas
//! holding the same message set always build byte-identical trees, so a
//! recursive hash comparison locates their set difference in a number of
//! round trips bounded by the tree depth times the number of differing
//! entries.
//!
//! Structure: level 0 holds an anchor node followed by one node per leaf,
//! in key order. A node is *promoted* (starts a new group one level up)
//! when the leading four bytes of its hash, read as a u32, fall below
//! `u32::MAX / TARGET_FANOUT`; the anchor node always starts the anchor
//! group. Each group becomes one node at the level above, keyed by its
//! first member and hashed over its members' hashes. The tree top is the
//! first level containing a single node.
//!
//! Promotion depends only on node hashes, so the shape is a pure function
//! of the key set: no insertion-order dependence, no rebalancing.

use gossamer_core::{Digest, Hasher, MessageId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Average group width the boundary rule aims for.
pub const TARGET_FANOUT: u32 = 32;

const BOUNDARY_LIMIT: u32 = u32::MAX / TARGET_FANOUT;

/// Hard cap on tree height; at this level everything merges into the root.
const MAX_LEVEL: u8 = 32;

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

/// One node of the tree, addressed by `(level, key)`. `key == None` is the
/// anchor node of its level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexNode {
    pub level: u8,
    pub key: Option<MessageId>,
    pub hash: Digest,
}

impl IndexNode {
    fn is_boundary(&self) -> bool {
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&self.hash.as_bytes()[..4]);
        self.key.is_some() && u32::from_be_bytes(prefix) < BOUNDARY_LIMIT
    }
}

/// The merkle index of one topic's message set.
pub struct MerkleIndex {
    leaves: BTreeMap<MessageId, Digest>,
    levels: Mutex<Option<Arc<Vec<Vec<IndexNode>>>>>,
}

impl MerkleIndex {
    pub fn new() -> Self {
        MerkleIndex {
            leaves: BTreeMap::new(),
            levels: Mutex::new(None),
        }
    }

    /// The hash an entry contributes to the tree.
    pub fn value_hash(encoded: &[u8]) -> Digest {
        Hasher::digest(encoded)
    }

    /// Add an entry. Idempotent: re-inserting an id is a no-op (ids are
    /// content hashes, so the value hash cannot differ).
    pub fn insert(&mut self, id: MessageId, value_hash: Digest) {
        if self.leaves.insert(id, value_hash).is_none() {
            *self.levels.lock() = None;
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// The root node.
    pub fn root(&self) -> IndexNode {
        let levels = self.build();
        *levels
            .last()
            .and_then(|l| l.first())
            .unwrap_or(&IndexNode {
                level: 0,
                key: None,
                hash: anchor_leaf_hash(),
            })
    }

    /// The node at `(level, key)`, if the tree currently contains one.
    pub fn node(&self, level: u8, key: Option<MessageId>) -> Option<IndexNode> {
        let levels = self.build();
        let nodes = levels.get(level as usize)?;
        match key {
            None => nodes.first().filter(|n| n.key.is_none()).copied(),
            Some(k) => nodes
                .binary_search_by(|n| match n.key {
                    None => std::cmp::Ordering::Less,
                    Some(nk) => nk.cmp(&k),
                })
                .ok()
                .map(|i| nodes[i]),
        }
    }

    /// The children of the node at `(level, key)`: the contiguous run of
    /// level - 1 nodes starting at the same key and ending before the next
    /// promoted node. Empty for leaves and unknown coordinates.
    pub fn children(&self, level: u8, key: Option<MessageId>) -> Vec<IndexNode> {
        if level == 0 {
            return Vec::new();
        }
        let levels = self.build();
        let Some(nodes) = levels.get(level as usize - 1) else {
            return Vec::new();
        };
        let start = match key {
            None => 0,
            Some(k) => match nodes.binary_search_by(|n| match n.key {
                None => std::cmp::Ordering::Less,
                Some(nk) => nk.cmp(&k),
            }) {
                Ok(i) => i,
                Err(_) => return Vec::new(),
            },
        };
        let mut out = Vec::new();
        for (offset, node) in nodes[start..].iter().enumerate() {
            if offset > 0 && node.is_boundary() && level <= MAX_LEVEL {
                break;
            }
            out.push(*node);
        }
        out
    }

    fn build(&self) -> Arc<Vec<Vec<IndexNode>>> {
        let mut cache = self.levels.lock();
        if let Some(levels) = cache.as_ref() {
            return Arc::clone(levels);
        }

        let mut level0 = Vec::with_capacity(self.leaves.len() + 1);
        level0.push(IndexNode {
            level: 0,
            key: None,
            hash: anchor_leaf_hash(),
        });
        for (id, value_hash) in &self.leaves {
            level0.push(IndexNode {
                level: 0,
                key: Some(*id),
                hash: leaf_hash(id, value_hash),
            });
        }

        let mut levels = vec![level0];
        while levels.last().map(|l| l.len()).unwrap_or(0) > 1 {
            let level = levels.len() as u8;
            let next = roll_up(levels.last().map(Vec::as_slice).unwrap_or(&[]), level);
            levels.push(next);
        }

        let levels = Arc::new(levels);
        *cache = Some(Arc::clone(&levels));
        levels
    }
}

impl Default for MerkleIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MerkleIndex {
    fn clone(&self) -> Self {
        MerkleIndex {
            leaves: self.leaves.clone(),
            levels: Mutex::new(None),
        }
    }
}

impl std::fmt::Debug for MerkleIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleIndex")
            .field("leaves", &self.leaves.len())
            .field("root", &self.root())
            .finish()
    }
}

fn anchor_leaf_hash() -> Digest {
    Hasher::digest(&[LEAF_TAG])
}

fn leaf_hash(id: &MessageId, value_hash: &Digest) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(&[LEAF_TAG]);
    hasher.update(id.as_bytes());
    hasher.update(value_hash.as_bytes());
    hasher.finalize()
}

fn roll_up(below: &[IndexNode], level: u8) -> Vec<IndexNode> {
    let mut out = Vec::new();
    let mut group_key: Option<MessageId> = None;
    let mut group_hasher = new_group_hasher();

    for (i, node) in below.iter().enumerate() {
        if i > 0 && node.is_boundary() && level <= MAX_LEVEL {
            out.push(IndexNode {
                level,
                key: group_key,
                hash: group_hasher.finalize(),
            });
            group_key = node.key;
            group_hasher = new_group_hasher();
        }
        group_hasher.update(node.hash.as_bytes());
    }
    out.push(IndexNode {
        level,
        key: group_key,
        hash: group_hasher.finalize(),
    });
    out
}

fn new_group_hasher() -> Hasher {
    let mut hasher = Hasher::new();
    hasher.update(&[NODE_TAG]);
    hasher
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u64) -> (MessageId, Digest) {
        let id = MessageId::derive(n, &n.to_be_bytes());
        let value = Hasher::digest(&n.to_le_bytes());
        (id, value)
    }

    fn index_of(ns: &[u64]) -> MerkleIndex {
        let mut index = MerkleIndex::new();
        for &n in ns {
            let (id, value) = entry(n);
            index.insert(id, value);
        }
        index
    }

    #[test]
    fn test_empty_root() {
        let index = MerkleIndex::new();
        let root = index.root();
        assert_eq!(root.key, None);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_root_reflects_set_not_order() {
        let forward = index_of(&(1..=100).collect::<Vec<_>>());
        let backward = index_of(&(1..=100).rev().collect::<Vec<_>>());
        assert_eq!(forward.root(), backward.root());
    }

    #[test]
    fn test_root_changes_with_set() {
        let a = index_of(&[1, 2, 3]);
        let b = index_of(&[1, 2, 4]);
        let c = index_of(&[1, 2]);
        assert_ne!(a.root(), b.root());
        assert_ne!(a.root(), c.root());
    }

    #[test]
    fn test_insert_idempotent() {
        let mut index = index_of(&[1, 2, 3]);
        let before = index.root();
        let (id, value) = entry(2);
        index.insert(id, value);
        assert_eq!(index.root(), before);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_children_cover_all_leaves() {
        let index = index_of(&(1..=500).collect::<Vec<_>>());
        let root = index.root();
        assert!(root.level >= 1);

        // Walk the tree and collect every leaf key reachable from the root.
        let mut keys = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.level == 0 {
                if let Some(key) = node.key {
                    keys.push(key);
                }
            } else {
                let children = index.children(node.level, node.key);
                assert!(!children.is_empty());
                stack.extend(children);
            }
        }
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 500);
    }

    #[test]
    fn test_children_hash_to_parent() {
        let index = index_of(&(1..=200).collect::<Vec<_>>());
        let root = index.root();
        let children = index.children(root.level, root.key);
        let mut hasher = Hasher::new();
        hasher.update(&[NODE_TAG]);
        for child in &children {
            hasher.update(child.hash.as_bytes());
        }
        assert_eq!(hasher.finalize(), root.hash);
    }

    #[test]
    fn test_node_lookup() {
        let index = index_of(&[1, 2, 3]);
        let root = index.root();
        assert_eq!(index.node(root.level, root.key), Some(root));

        let (id, _) = entry(2);
        let leaf = index.node(0, Some(id)).unwrap();
        assert_eq!(leaf.level, 0);
        assert_eq!(leaf.key, Some(id));

        let (missing, _) = entry(99);
        assert_eq!(index.node(0, Some(missing)), None);
    }

    #[test]
    fn test_diff_walk_finds_exactly_the_extra_leaf() {
        // Descending only into subtrees whose hashes differ locates the
        // set difference; equal subtrees are pruned without visiting.
        let base: Vec<u64> = (1..=300).collect();
        let mut extended = base.clone();
        extended.push(1000);

        let small = index_of(&base);
        let large = index_of(&extended);
        assert_ne!(small.root(), large.root());

        let (extra_id, _) = entry(1000);
        let mut missing = Vec::new();
        let mut stack = vec![large.root()];
        while let Some(node) = stack.pop() {
            if node.level == 0 {
                if let Some(key) = node.key {
                    if small.node(0, Some(key)).is_none() {
                        missing.push(key);
                    }
                }
                continue;
            }
            if small.node(node.level, node.key).map(|n| n.hash) == Some(node.hash) {
                continue;
            }
            stack.extend(large.children(node.level, node.key));
        }

        assert_eq!(missing, vec![extra_id]);
    }
}
