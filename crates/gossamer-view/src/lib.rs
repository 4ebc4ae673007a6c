//! # gossamer-view
//!
//! The read side of the Gossamer causal log:
//!
//! - [`LedgerStore`]: the append-only `$writes`/`$reverts`/`$records`
//!   contract, with [`MemoryLedger`] as the bundled backend and
//!   conflict-set (csx) assignment
//! - [`View`]: resolves the current value of any record from a DAG
//!   snapshot (a root set of heads), deterministically: the same message
//!   set yields the same value whatever order it arrived in, and a
//!   late-arriving causally-earlier message corrects state through revert
//!   rows instead of rewriting history
//! - [`Merge`]: the capability for combining concurrent writes of
//!   semilattice-valued models
//!
//! Ancestry queries are delegated through [`AncestorOracle`], implemented
//! by the log layer.

mod ledger;
mod merge;
mod view;

pub use ledger::{
    LedgerError, LedgerStore, MemoryLedger, RecordMeta, RevertRecord, WriteRecord,
};
pub use merge::{merge_members, Merge, MergeRegistry};
pub use view::{AncestorOracle, Resolved, View};
