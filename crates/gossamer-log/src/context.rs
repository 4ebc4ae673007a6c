//! Runtime execution: effects and the execution context.
//!
//! A [`Runtime`] is owned by the embedding application. The log calls it
//! once per inserted message, inside the topic's writer critical section,
//! and persists whatever effects it returns. The [`ExecutionContext`] is
//! passed by reference down the call chain; it is never stashed on shared
//! state, and the writer lock guarantees two effects for the same topic
//! never execute concurrently.

use gossamer_core::{Message, MessageId, RecordId};
use gossamer_store::{MemoryMessageStore, MessageStore};
use gossamer_view::{AncestorOracle, LedgerStore, MemoryLedger, View};
use serde_json::Value;
use thiserror::Error;

/// An effect a runtime derives from executing one message.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Write a record value. Produces one immutable `WriteRecord`, filed
    /// under the conflict set the log assigns at insertion.
    Write {
        model: String,
        key: String,
        value: Value,
    },

    /// Invalidate the write produced by `effect_id`. The executing message
    /// becomes the revert's cause: the revert only takes hold in views
    /// from which the executing message is visible.
    Revert { effect_id: MessageId },
}

/// Errors a runtime may raise. Execution failure is a validation failure:
/// the message is rejected and nothing is stored.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("Runtime rejected message: {0}")]
    Rejected(String),
}

/// Business logic executed against the log.
pub trait Runtime: Send + Sync {
    /// Derive the effects of one message. Reads go through `ctx`, which is
    /// anchored at the message's own parents (the causal snapshot the
    /// author saw), so re-execution on another replica reads the same
    /// state whatever else has arrived there since.
    fn execute(&self, ctx: &ExecutionContext<'_>, message: &Message)
        -> Result<Vec<Effect>, RuntimeError>;
}

/// A runtime with no business logic; every message has no effects.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRuntime;

impl Runtime for NoopRuntime {
    fn execute(
        &self,
        _ctx: &ExecutionContext<'_>,
        _message: &Message,
    ) -> Result<Vec<Effect>, RuntimeError> {
        Ok(Vec::new())
    }
}

/// Ancestry oracle over a message store.
pub(crate) struct StoreOracle<'a>(pub &'a MemoryMessageStore);

impl AncestorOracle for StoreOracle<'_> {
    fn is_ancestor(&self, roots: &[MessageId], id: &MessageId) -> bool {
        self.0.is_ancestor(roots, id)
    }
}

/// Read access handed to a runtime while it executes one message.
pub struct ExecutionContext<'a> {
    id: MessageId,
    message: &'a Message,
    store: &'a MemoryMessageStore,
    ledger: &'a MemoryLedger,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        id: MessageId,
        message: &'a Message,
        store: &'a MemoryMessageStore,
        ledger: &'a MemoryLedger,
    ) -> Self {
        ExecutionContext {
            id,
            message,
            store,
            ledger,
        }
    }

    /// The id of the executing message.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// The executing message.
    pub fn message(&self) -> &Message {
        self.message
    }

    /// Resolve a record as of the executing message's parents.
    pub fn resolve(&self, model: &str, key: &str) -> Option<gossamer_view::Resolved> {
        let record = RecordId::derive(model, key);
        let oracle = StoreOracle(self.store);
        View::new(self.ledger, &oracle, self.message.parents.clone()).resolve(&record)
    }

    /// The visible members of a record's conflict set, as of the executing
    /// message's parents. What a merging runtime folds.
    pub fn visible_members(
        &self,
        model: &str,
        key: &str,
        csx: u32,
    ) -> Vec<gossamer_view::WriteRecord> {
        let record = RecordId::derive(model, key);
        let oracle = StoreOracle(self.store);
        View::new(self.ledger, &oracle, self.message.parents.clone())
            .visible_members(&record, csx)
    }

    /// Every write row of a record, message id descending. Used by
    /// runtimes that need to find already-applied writes a late-arriving
    /// message invalidates.
    pub fn writes_of(&self, model: &str, key: &str) -> Vec<gossamer_view::WriteRecord> {
        self.writes_of_record(&RecordId::derive(model, key))
    }

    /// Every write row of a record id, message id descending.
    pub fn writes_of_record(&self, record: &RecordId) -> Vec<gossamer_view::WriteRecord> {
        self.ledger
            .write_ids_desc(record)
            .into_iter()
            .filter_map(|(m, _)| self.ledger.get_write(record, &m))
            .collect()
    }

    /// What a record id stands for.
    pub fn record_meta(&self, record: &RecordId) -> Option<gossamer_view::RecordMeta> {
        self.ledger.record_meta(record)
    }

    /// Record ids registered under a model.
    pub fn records_of_model(&self, model: &str) -> Vec<RecordId> {
        self.ledger.records_of_model(model)
    }

    /// DAG reachability.
    pub fn is_ancestor(&self, roots: &[MessageId], id: &MessageId) -> bool {
        self.store.is_ancestor(roots, id)
    }
}
