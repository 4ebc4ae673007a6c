//! # gossamer-sync
//!
//! Replication for the Gossamer causal log:
//!
//! - [`wire`]: versioned binary frames for the push channel
//!   (`Insert {key, value}`, `Update {heads}`) and the sync protocol
//!   (merkle node requests/responses keyed by tree level and key)
//! - [`Transport`]: the narrow network capability the sync layer needs,
//!   with [`MemoryTransport`] for in-process simulation
//! - [`SyncServer`]/[`sync_with`]: the two roles of the pairwise
//!   anti-entropy protocol: the server answers node and entry requests
//!   from one consistent snapshot; the client walks the server's tree,
//!   pulls the difference in dependency order, and backfills missing
//!   ancestors before retrying
//! - [`PushChannel`]: eager best-effort dissemination of local appends,
//!   with heads updates nudging lagging peers into a sync session
//! - [`SyncScheduler`]: the bounded job queue with its sweep/joined/
//!   missing-parent triggers, duplicate drop, cooldown, and the rule that
//!   a peer being served is never dialed
//! - [`SyncService`]: one-call wiring of all of the above for a topic

pub mod wire;

mod client;
mod error;
mod push;
mod scheduler;
mod server;
mod service;
mod transport;

pub use client::{sync_with, SyncOutcome};
pub use error::SyncError;
pub use push::PushChannel;
pub use scheduler::{
    DropReason, SchedulerHandle, SyncConfig, SyncConfigBuilder, SyncEvent, SyncReason,
    SyncScheduler,
};
pub use server::{ActiveServerSessions, SyncServer};
pub use service::SyncService;
pub use transport::{
    create_network, IncomingStream, MemoryTransport, PeerId, SyncStream, TopicEvent, Transport,
    TransportError,
};
