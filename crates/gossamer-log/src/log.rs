//! The gossip log: one topic's append-only message DAG.
//!
//! All mutation funnels through a single exclusive writer lock per topic:
//! `append` and `insert` take it, so no two inserts ever interleave their
//! updates of the store, the merkle index or the head set, and the index
//! root is always consistent with the stored set. Reads (view resolution,
//! sync serving) take the shared side and may run concurrently; a
//! sync server holds a [`Snapshot`] for its whole session.

use crate::context::{Effect, ExecutionContext, Runtime, StoreOracle};
use gossamer_core::{
    codec, CodecError, Message, MessageId, RecordId, Signature, Signer, SignerError, Topic,
    Verifier,
};
use gossamer_store::{
    IndexNode, MemoryMessageStore, MerkleIndex, MessageStore, StoreError, StoredMessage,
};
use gossamer_view::{
    LedgerError, LedgerStore, MemoryLedger, RecordMeta, Resolved, RevertRecord, View, WriteRecord,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use tracing::debug;

/// Capacity of the event channels.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors from [`GossipLog::append`].
#[derive(Error, Debug)]
pub enum AppendError {
    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Insert(#[from] InsertError),
}

/// Errors from [`GossipLog::insert`].
#[derive(Error, Debug)]
pub enum InsertError {
    /// The signature did not verify. Permanent rejection.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The message belongs to another topic. Permanent rejection.
    #[error("Message is for topic '{got}', this log is '{expected}'")]
    WrongTopic { expected: Topic, got: Topic },

    /// Some parents are not yet present locally. Not a permanent error:
    /// the message is left unindexed so the caller can trigger a sync
    /// session and retry once the ancestors are backfilled.
    #[error("Missing {} parent(s)", .0.len())]
    MissingParents(Vec<MessageId>),

    /// The frame failed to decode. Permanent rejection.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The runtime rejected the message. Permanent rejection.
    #[error("Runtime rejected message: {0}")]
    Runtime(String),

    /// Backend failure. Fatal to this topic's log.
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Ledger backend failure. Fatal to this topic's log.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl InsertError {
    /// The missing parent ids, when this is the missing-parent condition.
    pub fn missing_parents(&self) -> Option<&[MessageId]> {
        match self {
            InsertError::MissingParents(ids) => Some(ids),
            _ => None,
        }
    }
}

impl From<StoreError> for InsertError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MissingParents(ids) => InsertError::MissingParents(ids),
            StoreError::Io(msg) => InsertError::Storage(msg),
        }
    }
}

/// How a message entered the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Authored locally via `append`.
    Append,
    /// Received from a peer via `insert`.
    Insert,
}

/// Notifications raised by the log.
#[derive(Clone, Debug)]
pub enum LogEvent {
    /// A message was applied. Carries the wire bytes so a push channel can
    /// forward them without re-reading the store.
    Message {
        id: MessageId,
        origin: Origin,
        encoded: Arc<Vec<u8>>,
        heads: Vec<MessageId>,
    },

    /// The message's runtime effects were committed to the ledger.
    Commit {
        id: MessageId,
        writes: usize,
        reverts: usize,
    },
}

struct Inner {
    store: MemoryMessageStore,
    index: MerkleIndex,
    ledger: MemoryLedger,
}

/// One topic's append-only causal log of signed messages.
pub struct GossipLog {
    topic: Topic,
    verifier: Arc<dyn Verifier>,
    runtime: Arc<dyn Runtime>,
    inner: RwLock<Inner>,
    events: broadcast::Sender<LogEvent>,
}

impl GossipLog {
    pub fn new(topic: Topic, verifier: Arc<dyn Verifier>, runtime: Arc<dyn Runtime>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        GossipLog {
            topic,
            verifier,
            runtime,
            inner: RwLock::new(Inner {
                store: MemoryMessageStore::new(),
                index: MerkleIndex::new(),
                ledger: MemoryLedger::new(),
            }),
            events,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Subscribe to log notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    /// Author a message on the current head frontier: sign, store, index,
    /// update heads, notify. The message's parents are the head set at the
    /// time of the call.
    pub async fn append(
        &self,
        payload: Vec<u8>,
        signer: &dyn Signer,
    ) -> Result<(MessageId, Message), AppendError> {
        let mut inner = self.inner.write().await;
        let message = Message::on_parents(self.topic.clone(), inner.store.heads(), payload);
        let signature = signer.sign(&codec::encode_unsigned(&message))?;
        let encoded = codec::encode_signed(&signature, &message);
        let id = MessageId::derive(message.clock, &encoded);
        self.apply(
            &mut inner,
            id,
            signature,
            message.clone(),
            encoded,
            Origin::Append,
        )?;
        Ok((id, message))
    }

    /// Insert a message received from a peer.
    ///
    /// Validates the signature and schema, then requires every parent to
    /// be present already; otherwise fails with
    /// [`InsertError::MissingParents`] and stores nothing. A duplicate of
    /// an already-known id is a no-op (ids are content hashes).
    pub async fn insert(
        &self,
        signature: Signature,
        message: Message,
    ) -> Result<MessageId, InsertError> {
        let encoded = codec::encode_signed(&signature, &message);
        // Decode the canonical bytes back: this runs the schema checks
        // (parent order, clock rule) and derives the id.
        let (id, _, _) = codec::decode(&encoded)?;
        let mut inner = self.inner.write().await;
        self.apply(&mut inner, id, signature, message, encoded, Origin::Insert)
    }

    /// Insert a message straight from its wire encoding.
    pub async fn insert_encoded(&self, bytes: &[u8]) -> Result<MessageId, InsertError> {
        let (id, signature, message) = codec::decode(bytes)?;
        let mut inner = self.inner.write().await;
        self.apply(
            &mut inner,
            id,
            signature,
            message,
            bytes.to_vec(),
            Origin::Insert,
        )
    }

    fn apply(
        &self,
        inner: &mut Inner,
        id: MessageId,
        signature: Signature,
        message: Message,
        encoded: Vec<u8>,
        origin: Origin,
    ) -> Result<MessageId, InsertError> {
        if message.topic != self.topic {
            return Err(InsertError::WrongTopic {
                expected: self.topic.clone(),
                got: message.topic,
            });
        }
        if inner.store.contains(&id) {
            debug!(topic = %self.topic, id = %id.short(), "duplicate insert ignored");
            return Ok(id);
        }
        if origin == Origin::Insert
            && !self
                .verifier
                .verify(&signature, &codec::encode_unsigned(&message))
        {
            return Err(InsertError::InvalidSignature);
        }

        let missing: Vec<MessageId> = message
            .parents
            .iter()
            .filter(|p| !inner.store.contains(p))
            .copied()
            .collect();
        if !missing.is_empty() {
            debug!(
                topic = %self.topic,
                id = %id.short(),
                missing = missing.len(),
                "insert deferred: missing parents"
            );
            return Err(InsertError::MissingParents(missing));
        }

        // Execute business logic against the message's causal snapshot,
        // before anything is committed: a rejected message stores nothing.
        let effects = {
            let ctx = ExecutionContext::new(id, &message, &inner.store, &inner.ledger);
            self.runtime
                .execute(&ctx, &message)
                .map_err(|e| InsertError::Runtime(e.to_string()))?
        };

        let value_hash = MerkleIndex::value_hash(&encoded);
        let parents = message.parents.clone();
        inner.store.insert(
            id,
            StoredMessage {
                signature,
                message,
                encoded: encoded.clone(),
            },
        )?;
        inner.index.insert(id, value_hash);

        let mut writes = 0;
        let mut reverts = 0;
        for effect in effects {
            match effect {
                Effect::Write { model, key, value } => {
                    let record_id = RecordId::derive(&model, &key);
                    let csx = {
                        let store = &inner.store;
                        inner
                            .ledger
                            .next_csx(&record_id, &|m| store.is_ancestor(&parents, m))
                    };
                    inner.ledger.put_record(record_id, RecordMeta { model, key })?;
                    inner.ledger.put_write(WriteRecord {
                        record_id,
                        message_id: id,
                        csx,
                        value,
                    })?;
                    writes += 1;
                }
                Effect::Revert { effect_id } => {
                    inner.ledger.put_revert(RevertRecord {
                        effect_id,
                        cause_id: id,
                    })?;
                    reverts += 1;
                }
            }
        }

        let heads = inner.store.heads();
        let _ = self.events.send(LogEvent::Message {
            id,
            origin,
            encoded: Arc::new(encoded),
            heads,
        });
        if writes + reverts > 0 {
            let _ = self.events.send(LogEvent::Commit { id, writes, reverts });
        }
        debug!(topic = %self.topic, id = %id.short(), clock = id.clock(), "applied message");
        Ok(id)
    }

    /// Take a consistent read snapshot. Holds the shared lock until
    /// dropped; writers wait.
    pub async fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            guard: self.inner.read().await,
        }
    }

    /// The current head frontier.
    pub async fn heads(&self) -> Vec<MessageId> {
        self.snapshot().await.heads()
    }

    /// Whether an id is present.
    pub async fn contains(&self, id: &MessageId) -> bool {
        self.snapshot().await.contains(id)
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `id` is reachable from `roots`.
    pub async fn is_ancestor(&self, roots: &[MessageId], id: &MessageId) -> bool {
        self.snapshot().await.is_ancestor(roots, id)
    }

    /// The wire encoding of a stored message.
    pub async fn encoded(&self, id: &MessageId) -> Option<Vec<u8>> {
        self.snapshot().await.encoded(id).map(<[u8]>::to_vec)
    }

    /// Resolve a record's current value against the current heads.
    pub async fn resolve(&self, model: &str, key: &str) -> Option<Resolved> {
        self.snapshot().await.resolve(model, key)
    }
}

impl std::fmt::Debug for GossipLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipLog").field("topic", &self.topic).finish()
    }
}

/// A consistent read view of one log, held under the shared lock.
pub struct Snapshot<'a> {
    guard: RwLockReadGuard<'a, Inner>,
}

impl Snapshot<'_> {
    pub fn heads(&self) -> Vec<MessageId> {
        self.guard.store.heads()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.guard.store.contains(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&StoredMessage> {
        self.guard.store.get(id)
    }

    pub fn encoded(&self, id: &MessageId) -> Option<&[u8]> {
        self.guard.store.get(id).map(|s| s.encoded.as_slice())
    }

    pub fn len(&self) -> usize {
        self.guard.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.store.is_empty()
    }

    pub fn is_ancestor(&self, roots: &[MessageId], id: &MessageId) -> bool {
        self.guard.store.is_ancestor(roots, id)
    }

    /// All stored ids, ascending.
    pub fn ids(&self) -> Vec<MessageId> {
        self.guard.store.ids()
    }

    pub fn merkle_root(&self) -> IndexNode {
        self.guard.index.root()
    }

    pub fn merkle_node(&self, level: u8, key: Option<MessageId>) -> Option<IndexNode> {
        self.guard.index.node(level, key)
    }

    pub fn merkle_children(&self, level: u8, key: Option<MessageId>) -> Vec<IndexNode> {
        self.guard.index.children(level, key)
    }

    /// The ledger tables, for inspection and debugging tooling.
    pub fn ledger(&self) -> &MemoryLedger {
        &self.guard.ledger
    }

    /// Resolve a record against the snapshot's heads.
    pub fn resolve(&self, model: &str, key: &str) -> Option<Resolved> {
        self.resolve_record(&RecordId::derive(model, key))
    }

    /// Resolve a record id against the snapshot's heads.
    pub fn resolve_record(&self, record_id: &RecordId) -> Option<Resolved> {
        self.resolve_record_at(record_id, self.heads())
    }

    /// Resolve a record id against an explicit root set.
    pub fn resolve_record_at(&self, record_id: &RecordId, roots: Vec<MessageId>) -> Option<Resolved> {
        let oracle = StoreOracle(&self.guard.store);
        View::new(&self.guard.ledger, &oracle, roots).resolve(record_id)
    }

    /// The visible members of a record's conflict set, anchored at the
    /// snapshot's heads. What a merging reader folds.
    pub fn visible_members(&self, record_id: &RecordId, csx: u32) -> Vec<WriteRecord> {
        let oracle = StoreOracle(&self.guard.store);
        View::new(&self.guard.ledger, &oracle, self.heads()).visible_members(record_id, csx)
    }

    /// Single-writer fast path, anchored at the snapshot's heads.
    pub fn get_last_value(&self, model: &str, key: &str) -> Option<serde_json::Value> {
        let record_id = RecordId::derive(model, key);
        let oracle = StoreOracle(&self.guard.store);
        View::new(&self.guard.ledger, &oracle, self.heads()).get_last_value(&record_id)
    }

    /// Record ids registered under a model.
    pub fn records_of_model(&self, model: &str) -> Vec<RecordId> {
        self.guard.ledger.records_of_model(model)
    }
}
