//! The write/revert ledger.
//!
//! [`LedgerStore`] is the logical contract for the `$writes`, `$reverts`
//! and `$records` tables. Rows are append-only: a write is produced once
//! per message that writes a record and never mutated; newer information is
//! expressed only by adding [`RevertRecord`] rows.

use gossamer_core::{MessageId, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Errors from ledger storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Backend I/O failure. Fatal to the topic's log.
    #[error("Ledger storage failure: {0}")]
    Io(String),
}

/// One write of one record by one message. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteRecord {
    pub record_id: RecordId,
    pub message_id: MessageId,
    pub csx: u32,
    pub value: Value,
}

/// Marks the write produced by `effect_id` as invalidated because
/// `cause_id`, once known, proved it unsound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertRecord {
    pub effect_id: MessageId,
    pub cause_id: MessageId,
}

/// What a record id stands for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub model: String,
    pub key: String,
}

/// Contract for the ledger tables of one topic.
pub trait LedgerStore {
    fn put_write(&mut self, write: WriteRecord) -> Result<(), LedgerError>;

    fn put_revert(&mut self, revert: RevertRecord) -> Result<(), LedgerError>;

    /// Register what a record id stands for. Idempotent.
    fn put_record(&mut self, record_id: RecordId, meta: RecordMeta) -> Result<(), LedgerError>;

    /// The write a given message produced for a record, if any.
    fn get_write(&self, record_id: &RecordId, message_id: &MessageId) -> Option<WriteRecord>;

    /// All `(message_id, csx)` pairs for a record, message id descending.
    fn write_ids_desc(&self, record_id: &RecordId) -> Vec<(MessageId, u32)>;

    /// Member message ids of one conflict set, message id descending.
    fn csx_members_desc(&self, record_id: &RecordId, csx: u32) -> Vec<MessageId>;

    /// The greatest conflict-set index assigned for a record so far.
    fn greatest_csx(&self, record_id: &RecordId) -> Option<u32>;

    /// Causes registered against an effect message.
    fn revert_causes(&self, effect_id: &MessageId) -> Vec<MessageId>;

    fn record_meta(&self, record_id: &RecordId) -> Option<RecordMeta>;

    /// Record ids registered under a model, ascending.
    fn records_of_model(&self, model: &str) -> Vec<RecordId>;

    /// The conflict-set index a new write of `record_id` should be filed
    /// under, where `dominates` tells whether a given prior member is a
    /// causal ancestor of the writing message.
    ///
    /// A fresh record opens conflict set 1. Otherwise the write joins the
    /// record's greatest conflict set, unless it causally dominates every
    /// member of that set, in which case the next conflict set opens. Assigned
    /// once, at insertion, and immutable afterwards.
    fn next_csx(&self, record_id: &RecordId, dominates: &dyn Fn(&MessageId) -> bool) -> u32 {
        match self.greatest_csx(record_id) {
            None => 1,
            Some(csx) => {
                let members = self.csx_members_desc(record_id, csx);
                if members.iter().all(|m| dominates(m)) {
                    csx + 1
                } else {
                    csx
                }
            }
        }
    }
}

/// In-memory implementation of [`LedgerStore`].
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger {
    writes: BTreeMap<RecordId, BTreeMap<MessageId, WriteRecord>>,
    csx_index: BTreeMap<RecordId, BTreeMap<u32, BTreeSet<MessageId>>>,
    reverts: HashMap<MessageId, Vec<MessageId>>,
    records: BTreeMap<RecordId, RecordMeta>,
    models: BTreeMap<String, BTreeSet<RecordId>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of write rows, across all records.
    pub fn write_count(&self) -> usize {
        self.writes.values().map(|w| w.len()).sum()
    }

    /// Total number of revert rows.
    pub fn revert_count(&self) -> usize {
        self.reverts.values().map(|c| c.len()).sum()
    }
}

impl LedgerStore for MemoryLedger {
    fn put_write(&mut self, write: WriteRecord) -> Result<(), LedgerError> {
        self.csx_index
            .entry(write.record_id)
            .or_default()
            .entry(write.csx)
            .or_default()
            .insert(write.message_id);
        self.writes
            .entry(write.record_id)
            .or_default()
            .insert(write.message_id, write);
        Ok(())
    }

    fn put_revert(&mut self, revert: RevertRecord) -> Result<(), LedgerError> {
        let causes = self.reverts.entry(revert.effect_id).or_default();
        if !causes.contains(&revert.cause_id) {
            causes.push(revert.cause_id);
        }
        Ok(())
    }

    fn put_record(&mut self, record_id: RecordId, meta: RecordMeta) -> Result<(), LedgerError> {
        self.models
            .entry(meta.model.clone())
            .or_default()
            .insert(record_id);
        self.records.entry(record_id).or_insert(meta);
        Ok(())
    }

    fn get_write(&self, record_id: &RecordId, message_id: &MessageId) -> Option<WriteRecord> {
        self.writes.get(record_id)?.get(message_id).cloned()
    }

    fn write_ids_desc(&self, record_id: &RecordId) -> Vec<(MessageId, u32)> {
        self.writes
            .get(record_id)
            .map(|writes| {
                writes
                    .iter()
                    .rev()
                    .map(|(id, w)| (*id, w.csx))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn csx_members_desc(&self, record_id: &RecordId, csx: u32) -> Vec<MessageId> {
        self.csx_index
            .get(record_id)
            .and_then(|by_csx| by_csx.get(&csx))
            .map(|members| members.iter().rev().copied().collect())
            .unwrap_or_default()
    }

    fn greatest_csx(&self, record_id: &RecordId) -> Option<u32> {
        self.csx_index
            .get(record_id)?
            .keys()
            .next_back()
            .copied()
    }

    fn revert_causes(&self, effect_id: &MessageId) -> Vec<MessageId> {
        self.reverts.get(effect_id).cloned().unwrap_or_default()
    }

    fn record_meta(&self, record_id: &RecordId) -> Option<RecordMeta> {
        self.records.get(record_id).cloned()
    }

    fn records_of_model(&self, model: &str) -> Vec<RecordId> {
        self.models
            .get(model)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}
