//! Versioned binary codec for signed messages.
//!
//! The encoding is an explicit byte layout rather than a serde format:
//! message ids are content hashes of these bytes, so the mapping must be
//! byte-exact and stable across releases. All integers are big-endian.
//!
//! Signed frame:
//!
//! ```text
//! version: u8
//! public_key_len: u32, public_key
//! scheme_len: u32, scheme (utf-8)
//! signature_len: u32, signature
//! body (the unsigned encoding, below)
//! ```
//!
//! Unsigned body (the bytes a signer signs):
//!
//! ```text
//! version: u8
//! topic_len: u32, topic (utf-8)
//! clock: u64
//! parent_count: u32, parents (32 bytes each, ascending)
//! payload_len: u32, payload
//! ```
//!
//! Decoding validates structure: unknown versions, non-canonical parent
//! sets, and clocks that do not follow from the parents are all rejected.
//! A parent whose embedded clock is not strictly below the message clock is
//! rejected too, which rules out self-referential and cyclic parent sets at
//! the codec boundary.

use crate::error::CodecError;
use crate::id::{MessageId, MESSAGE_ID_LEN};
use crate::message::{Message, Signature, Topic};

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

const MAX_TOPIC_LEN: usize = 1024;
const MAX_SCHEME_LEN: usize = 256;

/// Encode the unsigned body of a message. These are the bytes handed to a
/// signer capability.
pub fn encode_unsigned(message: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        1 + 4
            + message.topic.as_str().len()
            + 8
            + 4
            + message.parents.len() * MESSAGE_ID_LEN
            + 4
            + message.payload.len(),
    );
    out.push(CODEC_VERSION);
    put_bytes(&mut out, message.topic.as_str().as_bytes());
    out.extend_from_slice(&message.clock.to_be_bytes());
    out.extend_from_slice(&(message.parents.len() as u32).to_be_bytes());
    for parent in &message.parents {
        out.extend_from_slice(parent.as_bytes());
    }
    put_bytes(&mut out, &message.payload);
    out
}

/// Encode a signed message frame. The resulting bytes are what gets stored,
/// hashed into the message id, and exchanged with peers.
pub fn encode_signed(signature: &Signature, message: &Message) -> Vec<u8> {
    let body = encode_unsigned(message);
    let mut out = Vec::with_capacity(
        1 + 4
            + signature.public_key.len()
            + 4
            + signature.scheme.len()
            + 4
            + signature.bytes.len()
            + body.len(),
    );
    out.push(CODEC_VERSION);
    put_bytes(&mut out, &signature.public_key);
    put_bytes(&mut out, signature.scheme.as_bytes());
    put_bytes(&mut out, &signature.bytes);
    out.extend_from_slice(&body);
    out
}

/// Decode a signed message frame, returning the derived id, the signature,
/// and the message. Round-trips exactly with [`encode_signed`].
pub fn decode(bytes: &[u8]) -> Result<(MessageId, Signature, Message), CodecError> {
    let mut reader = Reader::new(bytes);

    let version = reader.u8()?;
    if version != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let public_key = reader.bytes()?.to_vec();
    let scheme_bytes = reader.bytes()?;
    if scheme_bytes.len() > MAX_SCHEME_LEN {
        return Err(CodecError::FieldTooLong {
            len: scheme_bytes.len(),
            limit: MAX_SCHEME_LEN,
        });
    }
    let scheme = std::str::from_utf8(scheme_bytes)
        .map_err(|_| CodecError::InvalidScheme)?
        .to_string();
    let sig_bytes = reader.bytes()?.to_vec();

    let body_version = reader.u8()?;
    if body_version != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion(body_version));
    }

    let topic_bytes = reader.bytes()?;
    if topic_bytes.len() > MAX_TOPIC_LEN {
        return Err(CodecError::FieldTooLong {
            len: topic_bytes.len(),
            limit: MAX_TOPIC_LEN,
        });
    }
    let topic = std::str::from_utf8(topic_bytes)
        .map_err(|_| CodecError::InvalidTopic)?
        .to_string();

    let clock = reader.u64()?;
    let parent_count = reader.u32()? as usize;
    let mut parents = Vec::with_capacity(parent_count.min(1024));
    for _ in 0..parent_count {
        let mut id_bytes = [0u8; MESSAGE_ID_LEN];
        id_bytes.copy_from_slice(reader.take(MESSAGE_ID_LEN)?);
        parents.push(MessageId::from_bytes(id_bytes));
    }
    let payload = reader.bytes()?.to_vec();
    reader.finish()?;

    // Canonical form: strictly ascending parents (sorted, no duplicates).
    if parents.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CodecError::UnsortedParents);
    }
    // Every parent precedes the message; this also rejects self-references
    // and any cycle, since a cycle needs some non-decreasing clock edge.
    for parent in &parents {
        if parent.clock() >= clock {
            return Err(CodecError::ParentClockViolation {
                parent: *parent,
                clock,
            });
        }
    }
    let expected = 1 + parents.iter().map(|p| p.clock()).max().unwrap_or(0);
    if clock != expected {
        return Err(CodecError::ClockMismatch {
            declared: clock,
            expected,
        });
    }

    let id = MessageId::derive(clock, bytes);
    let signature = Signature {
        public_key,
        scheme,
        bytes: sig_bytes,
    };
    let message = Message {
        topic: Topic::new(topic),
        clock,
        parents,
        payload,
    };
    Ok((id, signature, message))
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Cursor over a frame.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.bytes.len() - self.pos < n {
            return Err(CodecError::Truncated {
                needed: n - (self.bytes.len() - self.pos),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn finish(&self) -> Result<(), CodecError> {
        if self.pos != self.bytes.len() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(())
    }
}
