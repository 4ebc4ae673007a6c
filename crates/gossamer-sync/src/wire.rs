//! Wire frames for the push channel and the sync protocol.
//!
//! Both protocols share one versioned binary framing: a version byte, a
//! kind byte, then kind-specific fields, big-endian integers and
//! length-prefixed buffers throughout. Push frames travel as datagrams;
//! sync frames travel over a bidirectional per-session stream.

use gossamer_core::{Digest, MessageId, Topic, MESSAGE_ID_LEN};
use gossamer_store::IndexNode;
use thiserror::Error;

/// Current wire protocol version.
pub const WIRE_VERSION: u8 = 1;

const KIND_INSERT: u8 = 0x01;
const KIND_UPDATE: u8 = 0x02;
const KIND_GET_ROOT: u8 = 0x10;
const KIND_GET_CHILDREN: u8 = 0x11;
const KIND_GET_VALUES: u8 = 0x12;
const KIND_ROOT: u8 = 0x20;
const KIND_CHILDREN: u8 = 0x21;
const KIND_VALUES: u8 = 0x22;

/// Errors from wire framing. Malformed frames are permanently rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown frame kind: {0:#04x}")]
    UnknownKind(u8),

    #[error("Truncated frame")]
    Truncated,

    #[error("Trailing bytes after frame")]
    TrailingBytes,

    #[error("Topic is not valid UTF-8")]
    InvalidTopic,
}

/// Frames exchanged over the push channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushFrame {
    /// A fully encoded message ready for insertion: `key` is its id,
    /// `value` its signed wire encoding.
    Insert {
        topic: Topic,
        key: MessageId,
        value: Vec<u8>,
    },

    /// The sender's current DAG frontier. A receiver that is missing any
    /// of these heads is behind and can open a sync session instead of
    /// waiting for further individual pushes.
    Update {
        topic: Topic,
        heads: Vec<MessageId>,
    },
}

/// Requests of the sync protocol, client to server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncRequest {
    /// The server's merkle root.
    GetRoot,

    /// The children of the node at `(level, key)`.
    GetChildren {
        level: u8,
        key: Option<MessageId>,
    },

    /// The signed encodings of the given entries.
    GetValues { ids: Vec<MessageId> },
}

/// Responses of the sync protocol, server to client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncResponse {
    Root(IndexNode),
    Children(Vec<IndexNode>),
    /// Entries the server holds, in request order; absent entries are
    /// omitted.
    Values(Vec<Vec<u8>>),
}

pub fn encode_push(frame: &PushFrame) -> Vec<u8> {
    let mut out = vec![WIRE_VERSION];
    match frame {
        PushFrame::Insert { topic, key, value } => {
            out.push(KIND_INSERT);
            put_bytes(&mut out, topic.as_str().as_bytes());
            out.extend_from_slice(key.as_bytes());
            put_bytes(&mut out, value);
        }
        PushFrame::Update { topic, heads } => {
            out.push(KIND_UPDATE);
            put_bytes(&mut out, topic.as_str().as_bytes());
            out.extend_from_slice(&(heads.len() as u32).to_be_bytes());
            for head in heads {
                out.extend_from_slice(head.as_bytes());
            }
        }
    }
    out
}

pub fn decode_push(bytes: &[u8]) -> Result<PushFrame, WireError> {
    let mut reader = Reader::new(bytes);
    reader.version()?;
    let kind = reader.u8()?;
    let frame = match kind {
        KIND_INSERT => {
            let topic = reader.topic()?;
            let key = reader.message_id()?;
            let value = reader.bytes()?.to_vec();
            PushFrame::Insert { topic, key, value }
        }
        KIND_UPDATE => {
            let topic = reader.topic()?;
            let count = reader.u32()? as usize;
            let mut heads = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                heads.push(reader.message_id()?);
            }
            PushFrame::Update { topic, heads }
        }
        other => return Err(WireError::UnknownKind(other)),
    };
    reader.finish()?;
    Ok(frame)
}

pub fn encode_request(request: &SyncRequest) -> Vec<u8> {
    let mut out = vec![WIRE_VERSION];
    match request {
        SyncRequest::GetRoot => out.push(KIND_GET_ROOT),
        SyncRequest::GetChildren { level, key } => {
            out.push(KIND_GET_CHILDREN);
            out.push(*level);
            put_optional_id(&mut out, key);
        }
        SyncRequest::GetValues { ids } => {
            out.push(KIND_GET_VALUES);
            out.extend_from_slice(&(ids.len() as u32).to_be_bytes());
            for id in ids {
                out.extend_from_slice(id.as_bytes());
            }
        }
    }
    out
}

pub fn decode_request(bytes: &[u8]) -> Result<SyncRequest, WireError> {
    let mut reader = Reader::new(bytes);
    reader.version()?;
    let kind = reader.u8()?;
    let request = match kind {
        KIND_GET_ROOT => SyncRequest::GetRoot,
        KIND_GET_CHILDREN => {
            let level = reader.u8()?;
            let key = reader.optional_id()?;
            SyncRequest::GetChildren { level, key }
        }
        KIND_GET_VALUES => {
            let count = reader.u32()? as usize;
            let mut ids = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                ids.push(reader.message_id()?);
            }
            SyncRequest::GetValues { ids }
        }
        other => return Err(WireError::UnknownKind(other)),
    };
    reader.finish()?;
    Ok(request)
}

pub fn encode_response(response: &SyncResponse) -> Vec<u8> {
    let mut out = vec![WIRE_VERSION];
    match response {
        SyncResponse::Root(node) => {
            out.push(KIND_ROOT);
            put_node(&mut out, node);
        }
        SyncResponse::Children(nodes) => {
            out.push(KIND_CHILDREN);
            out.extend_from_slice(&(nodes.len() as u32).to_be_bytes());
            for node in nodes {
                put_node(&mut out, node);
            }
        }
        SyncResponse::Values(values) => {
            out.push(KIND_VALUES);
            out.extend_from_slice(&(values.len() as u32).to_be_bytes());
            for value in values {
                put_bytes(&mut out, value);
            }
        }
    }
    out
}

pub fn decode_response(bytes: &[u8]) -> Result<SyncResponse, WireError> {
    let mut reader = Reader::new(bytes);
    reader.version()?;
    let kind = reader.u8()?;
    let response = match kind {
        KIND_ROOT => SyncResponse::Root(reader.node()?),
        KIND_CHILDREN => {
            let count = reader.u32()? as usize;
            let mut nodes = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                nodes.push(reader.node()?);
            }
            SyncResponse::Children(nodes)
        }
        KIND_VALUES => {
            let count = reader.u32()? as usize;
            let mut values = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                values.push(reader.bytes()?.to_vec());
            }
            SyncResponse::Values(values)
        }
        other => return Err(WireError::UnknownKind(other)),
    };
    reader.finish()?;
    Ok(response)
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn put_optional_id(out: &mut Vec<u8>, id: &Option<MessageId>) {
    match id {
        None => out.push(0),
        Some(id) => {
            out.push(1);
            out.extend_from_slice(id.as_bytes());
        }
    }
}

fn put_node(out: &mut Vec<u8>, node: &IndexNode) {
    out.push(node.level);
    put_optional_id(out, &node.key);
    out.extend_from_slice(node.hash.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.bytes.len() - self.pos < n {
            return Err(WireError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn version(&mut self) -> Result<(), WireError> {
        let version = self.u8()?;
        if version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn topic(&mut self) -> Result<Topic, WireError> {
        let bytes = self.bytes()?;
        std::str::from_utf8(bytes)
            .map(Topic::new)
            .map_err(|_| WireError::InvalidTopic)
    }

    fn message_id(&mut self) -> Result<MessageId, WireError> {
        let mut buf = [0u8; MESSAGE_ID_LEN];
        buf.copy_from_slice(self.take(MESSAGE_ID_LEN)?);
        Ok(MessageId::from_bytes(buf))
    }

    fn optional_id(&mut self) -> Result<Option<MessageId>, WireError> {
        match self.u8()? {
            0 => Ok(None),
            _ => Ok(Some(self.message_id()?)),
        }
    }

    fn node(&mut self) -> Result<IndexNode, WireError> {
        let level = self.u8()?;
        let key = self.optional_id()?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.take(32)?);
        Ok(IndexNode {
            level,
            key,
            hash: Digest::from_bytes(hash),
        })
    }

    fn finish(&self) -> Result<(), WireError> {
        if self.pos != self.bytes.len() {
            return Err(WireError::TrailingBytes);
        }
        Ok(())
    }
}
