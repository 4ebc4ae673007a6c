//! Messages, topics and detached signatures.

use crate::id::MessageId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A namespace isolating one DAG and one key space.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Topic(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Topic::new(name)
    }
}

/// One immutable unit of the log.
///
/// `parents` is the message's causal frontier at creation time: the author's
/// head set, sorted ascending. `clock` is `1 + max(parent clocks)`, or `1`
/// for a message with no parents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: Topic,
    pub clock: u64,
    pub parents: Vec<MessageId>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message on top of the given parent frontier.
    ///
    /// Parents are sorted into canonical order; the clock follows from them.
    pub fn on_parents(topic: Topic, mut parents: Vec<MessageId>, payload: Vec<u8>) -> Self {
        parents.sort();
        parents.dedup();
        let clock = 1 + parents.iter().map(|p| p.clock()).max().unwrap_or(0);
        Message {
            topic,
            clock,
            parents,
            payload,
        }
    }
}

/// A detached signature over a message's unsigned encoding.
///
/// Gossamer never interprets these fields itself; creation and verification
/// go through the [`Signer`](crate::signer::Signer) and
/// [`Verifier`](crate::signer::Verifier) capabilities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub public_key: Vec<u8>,
    pub scheme: String,
    pub bytes: Vec<u8>,
}
