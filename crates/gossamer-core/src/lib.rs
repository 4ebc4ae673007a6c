//! # gossamer-core
//!
//! Foundations of the Gossamer causal log:
//!
//! - Content-derived [`MessageId`]s whose ordering embeds the logical clock,
//!   so every parent id is strictly less than its child's id
//! - [`Message`], [`Topic`] and detached [`Signature`]s
//! - The versioned binary [`codec`] mapping wire bytes to
//!   `(id, signature, message)` triples, round-trip exact
//! - The [`Signer`]/[`Verifier`] capability seam for external identity
//!   schemes
//!
//! ## Example
//!
//! ```rust
//! use gossamer_core::{codec, DigestSigner, Message, Signer, Topic};
//!
//! let message = Message::on_parents(Topic::new("room"), vec![], b"hi".to_vec());
//! let signer = DigestSigner::new("alice");
//! let signature = signer.sign(&codec::encode_unsigned(&message)).unwrap();
//!
//! let encoded = codec::encode_signed(&signature, &message);
//! let (id, signature2, message2) = codec::decode(&encoded).unwrap();
//! assert_eq!(message2, message);
//! assert_eq!(signature2, signature);
//! assert_eq!(id.clock(), 1);
//! ```

pub mod codec;
mod error;
mod hash;
mod id;
mod message;
mod signer;

pub use error::{CodecError, SignerError};
pub use hash::{Digest, Hasher};
pub use id::{MessageId, RecordId, MESSAGE_ID_LEN};
pub use message::{Message, Signature, Topic};
pub use signer::{DigestSigner, DigestVerifier, Signer, Verifier, DIGEST_SCHEME};
