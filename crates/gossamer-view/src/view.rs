//! Deterministic record resolution from a DAG snapshot.
//!
//! A [`View`] is anchored at a root set (a snapshot of heads) and resolves
//! the value of any record as a pure function of that snapshot: arrival
//! order never matters, and concurrent writes resolve the same way on
//! every replica. Plain last-write-wins by arrival time would be unsound
//! here: there is no global clock, so "last" is only meaningful relative
//! to the visible DAG.

use crate::ledger::{LedgerStore, WriteRecord};
use gossamer_core::{MessageId, RecordId};
use serde_json::Value;

/// DAG reachability, supplied by the log layer.
pub trait AncestorOracle {
    /// Whether `id` is reachable from `roots` (a root itself counts).
    fn is_ancestor(&self, roots: &[MessageId], id: &MessageId) -> bool;
}

/// A resolved record value and where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub value: Value,
    /// The message whose write won.
    pub version: MessageId,
    /// The conflict set the winning write belongs to.
    pub csx: u32,
}

/// A read anchored at a fixed root set.
pub struct View<'a> {
    ledger: &'a dyn LedgerStore,
    oracle: &'a dyn AncestorOracle,
    roots: Vec<MessageId>,
}

impl<'a> View<'a> {
    pub fn new(
        ledger: &'a dyn LedgerStore,
        oracle: &'a dyn AncestorOracle,
        roots: Vec<MessageId>,
    ) -> Self {
        View {
            ledger,
            oracle,
            roots,
        }
    }

    /// The root set this view is anchored at.
    pub fn roots(&self) -> &[MessageId] {
        &self.roots
    }

    /// Resolve the current value of a record.
    ///
    /// 1. Scan the record's writes in descending message-id order for the
    ///    first one visible from the roots; this is the base.
    /// 2. Climb: while the next conflict set has a visible member, adopt
    ///    its greatest visible member as the new base. Message-id order and
    ///    conflict-set order are not aligned across divergent branches, so
    ///    the descending scan alone can miss a higher, equally visible
    ///    conflict set produced elsewhere.
    /// 3. If the candidate is reverted (some revert cause is visible),
    ///    step down one conflict set and retry; a reverted sole conflict
    ///    set means the record has no value.
    pub fn resolve(&self, record_id: &RecordId) -> Option<Resolved> {
        let mut base: Option<(u32, MessageId)> = None;
        for (message_id, csx) in self.ledger.write_ids_desc(record_id) {
            if self.sees(&message_id) {
                base = Some((csx, message_id));
                break;
            }
        }
        let (mut csx, mut candidate) = base?;

        while let Some(higher) = self.greatest_element(record_id, csx + 1) {
            csx += 1;
            candidate = higher;
        }

        loop {
            if !self.is_reverted(&candidate) {
                let write = self.ledger.get_write(record_id, &candidate)?;
                return Some(Resolved {
                    value: write.value,
                    version: candidate,
                    csx,
                });
            }
            loop {
                if csx <= 1 {
                    return None;
                }
                csx -= 1;
                if let Some(lower) = self.greatest_element(record_id, csx) {
                    candidate = lower;
                    break;
                }
            }
        }
    }

    /// The causally-latest visible member of one conflict set: the member
    /// with the greatest message id that is an ancestor of the roots.
    pub fn greatest_element(&self, record_id: &RecordId, csx: u32) -> Option<MessageId> {
        self.ledger
            .csx_members_desc(record_id, csx)
            .into_iter()
            .find(|m| self.sees(m))
    }

    /// Every visible, non-reverted member of one conflict set, message id
    /// ascending. This is the set a merging runtime combines; the view
    /// itself never merges.
    pub fn visible_members(&self, record_id: &RecordId, csx: u32) -> Vec<WriteRecord> {
        let mut members: Vec<WriteRecord> = self
            .ledger
            .csx_members_desc(record_id, csx)
            .into_iter()
            .filter(|m| self.sees(m) && !self.is_reverted(m))
            .filter_map(|m| self.ledger.get_write(record_id, &m))
            .collect();
        members.reverse();
        members
    }

    /// Fast path for records that never receive concurrent writes: the
    /// first visible, non-reverted write in descending message-id order,
    /// with no conflict-set bookkeeping. A pure shortcut over the same
    /// ancestry primitives.
    pub fn get_last_value(&self, record_id: &RecordId) -> Option<Value> {
        for (message_id, _) in self.ledger.write_ids_desc(record_id) {
            if self.sees(&message_id) && !self.is_reverted(&message_id) {
                return self
                    .ledger
                    .get_write(record_id, &message_id)
                    .map(|w| w.value);
            }
        }
        None
    }

    /// Whether the write produced by `effect` is invalidated under this
    /// view: true if any revert cause against it is visible from the roots.
    pub fn is_reverted(&self, effect: &MessageId) -> bool {
        self.ledger
            .revert_causes(effect)
            .iter()
            .any(|cause| self.sees(cause))
    }

    fn sees(&self, id: &MessageId) -> bool {
        self.oracle.is_ancestor(&self.roots, id)
    }
}
