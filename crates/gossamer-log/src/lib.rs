//! # gossamer-log
//!
//! The gossip log: one append-only causal DAG of signed messages per
//! topic.
//!
//! - [`GossipLog`]: `append` for local writes, `insert` for received
//!   ones; enforces causal dependencies structurally (a message whose
//!   parents are absent fails with a distinguished missing-parent
//!   condition instead of being applied as an orphan), keeps the head
//!   frontier and merkle index consistent under an exclusive writer lock,
//!   and raises typed notifications on dedicated channels
//! - [`Runtime`]/[`ExecutionContext`]/[`Effect`]: the collaborator seam
//!   for application business logic, executed once per inserted message
//!   against that message's own causal snapshot
//! - [`LogRegistry`]: explicit open/close lifecycle for per-topic logs
//!
//! ## Example
//!
//! ```rust
//! use gossamer_core::{DigestSigner, DigestVerifier, Topic};
//! use gossamer_log::{GossipLog, NoopRuntime};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let log = GossipLog::new(
//!     Topic::new("room"),
//!     Arc::new(DigestVerifier),
//!     Arc::new(NoopRuntime),
//! );
//! let signer = DigestSigner::new("alice");
//! let (id, _message) = log.append(b"hello".to_vec(), &signer).await.unwrap();
//! assert_eq!(log.heads().await, vec![id]);
//! # }
//! ```

mod context;
mod log;
mod registry;

pub use context::{Effect, ExecutionContext, NoopRuntime, Runtime, RuntimeError};
pub use log::{AppendError, GossipLog, InsertError, LogEvent, Origin, Snapshot};
pub use registry::{LogRegistry, RegistryError};
