//! The merge capability for concurrent writes.
//!
//! With no merge registered for a model, resolution picks the single
//! causally-latest visible write of the winning conflict set. Applications
//! whose values form a semilattice can instead register a [`Merge`] per
//! model; the runtime then combines every visible member of the winning
//! conflict set with it.

use crate::ledger::WriteRecord;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Combines two concurrent values into one.
///
/// # Contract
///
/// The function must be commutative and associative over the values it
/// will actually see, so every replica folds a conflict set to the same
/// result whatever order its members arrived in. This is not verified at
/// runtime; a non-commutative merge silently breaks convergence.
pub trait Merge: Send + Sync {
    fn merge(&self, a: &Value, b: &Value) -> Value;
}

impl<F> Merge for F
where
    F: Fn(&Value, &Value) -> Value + Send + Sync,
{
    fn merge(&self, a: &Value, b: &Value) -> Value {
        self(a, b)
    }
}

/// Fold a conflict set's visible members with a merge function.
///
/// Members are folded in ascending message-id order; with a law-abiding
/// merge the order is immaterial, this just makes the fold deterministic
/// even against a misbehaving one.
pub fn merge_members(members: &[WriteRecord], merge: &dyn Merge) -> Option<Value> {
    let mut iter = members.iter();
    let first = iter.next()?.value.clone();
    Some(iter.fold(first, |acc, member| merge.merge(&acc, &member.value)))
}

/// Per-model registry of merge capabilities, owned by the runtime layer.
#[derive(Clone, Default)]
pub struct MergeRegistry {
    by_model: HashMap<String, Arc<dyn Merge>>,
}

impl MergeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: impl Into<String>, merge: Arc<dyn Merge>) {
        self.by_model.insert(model.into(), merge);
    }

    pub fn get(&self, model: &str) -> Option<&Arc<dyn Merge>> {
        self.by_model.get(model)
    }
}

impl std::fmt::Debug for MergeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeRegistry")
            .field("models", &self.by_model.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossamer_core::{MessageId, RecordId};
    use serde_json::json;

    fn member(clock: u64, salt: &[u8], value: Value) -> WriteRecord {
        WriteRecord {
            record_id: RecordId::derive("m", "k"),
            message_id: MessageId::derive(clock, salt),
            csx: 1,
            value,
        }
    }

    /// Union of counter maps, taking the max per key.
    fn counter_merge(a: &Value, b: &Value) -> Value {
        let mut merged = a.as_object().cloned().unwrap_or_default();
        if let Some(other) = b.as_object() {
            for (k, v) in other {
                let existing = merged.get(k).and_then(Value::as_u64).unwrap_or(0);
                let incoming = v.as_u64().unwrap_or(0);
                merged.insert(k.clone(), json!(existing.max(incoming)));
            }
        }
        Value::Object(merged)
    }

    #[test]
    fn test_merge_members() {
        let members = vec![
            member(2, b"a", json!({"a": 1})),
            member(2, b"b", json!({"b": 1})),
        ];
        let merged = merge_members(&members, &counter_merge).unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 1}));
    }

    #[test]
    fn test_merge_empty() {
        assert_eq!(merge_members(&[], &counter_merge), None);
    }

    #[test]
    fn test_registry() {
        let mut registry = MergeRegistry::new();
        registry.register("counters", Arc::new(counter_merge));
        assert!(registry.get("counters").is_some());
        assert!(registry.get("posts").is_none());
    }
}
