//! Word layout of node and edge versions in the data heap.
//!
//! Every version starts with four common words `[kind, id, type, payload_len]`
//! followed by kind-specific link words and the payload packed little-endian
//! into whole words. Links hold row handles (zero for none), so they always
//! resolve to the linked object's current version.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{ObjectId, ObjectKind, Result, RowId, SombraError, TypeId};

use super::handle::Handle;
use super::region::{HeapOffset, Region};

pub(crate) mod layout {
    pub const KIND: usize = 0;
    pub const ID: usize = 1;
    pub const TYPE: usize = 2;
    pub const PAYLOAD_LEN: usize = 3;
    pub const COMMON: usize = 4;

    pub const NODE_FIRST_EDGE: usize = 4;
    pub const NODE_SECOND_EDGE: usize = 5;
    pub const NODE_FIXED: usize = 6;

    pub const EDGE_FIRST_ID: usize = 4;
    pub const EDGE_SECOND_ID: usize = 5;
    pub const EDGE_FIRST_NODE: usize = 6;
    pub const EDGE_SECOND_NODE: usize = 7;
    pub const EDGE_NEXT_FIRST: usize = 8;
    pub const EDGE_NEXT_SECOND: usize = 9;
    pub const EDGE_FIXED: usize = 10;
}

const WORD_BYTES: usize = 8;

fn fixed_words(kind: ObjectKind) -> usize {
    match kind {
        ObjectKind::Node => layout::NODE_FIXED,
        ObjectKind::Edge => layout::EDGE_FIXED,
    }
}

fn payload_words(len: usize) -> usize {
    len.div_ceil(WORD_BYTES)
}

/// Fields shared by nodes and edges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Record shape.
    pub kind: ObjectKind,
    /// External id.
    pub id: ObjectId,
    /// Caller-defined type tag.
    pub type_id: TypeId,
    /// Payload length in bytes.
    pub payload_len: u64,
}

impl Header {
    /// Reads only the common header words of the version at `offset`.
    pub(crate) fn load(region: &Region, offset: HeapOffset) -> Result<Self> {
        let words = region.heap(offset, layout::COMMON)?;
        Ok(Self {
            kind: ObjectKind::from_tag(words[layout::KIND].load(Ordering::Relaxed))?,
            id: ObjectId(words[layout::ID].load(Ordering::Relaxed)),
            type_id: TypeId(words[layout::TYPE].load(Ordering::Relaxed)),
            payload_len: words[layout::PAYLOAD_LEN].load(Ordering::Relaxed),
        })
    }
}

/// A node version read out of the heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    /// Common header.
    pub header: Header,
    /// Head of the list of edges whose first endpoint is this node.
    pub first_edge: Option<Handle>,
    /// Head of the list of edges whose second endpoint is this node.
    pub second_edge: Option<Handle>,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

/// An edge version read out of the heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeRecord {
    /// Common header.
    pub header: Header,
    /// Id of the first endpoint node.
    pub first: ObjectId,
    /// Id of the second endpoint node.
    pub second: ObjectId,
    /// Handle of the first endpoint node.
    pub first_node: Handle,
    /// Handle of the second endpoint node.
    pub second_node: Handle,
    /// Next edge in the first endpoint's list.
    pub next_first: Option<Handle>,
    /// Next edge in the second endpoint's list.
    pub next_second: Option<Handle>,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

/// A dereferenced object of either kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    /// A node version.
    Node(NodeRecord),
    /// An edge version.
    Edge(EdgeRecord),
}

impl Record {
    /// Common header of the record.
    pub fn header(&self) -> &Header {
        match self {
            Record::Node(node) => &node.header,
            Record::Edge(edge) => &edge.header,
        }
    }

    /// External id of the record.
    pub fn id(&self) -> ObjectId {
        self.header().id
    }

    /// Type tag of the record.
    pub fn type_id(&self) -> TypeId {
        self.header().type_id
    }

    /// Payload bytes of the record.
    pub fn payload(&self) -> &[u8] {
        match self {
            Record::Node(node) => &node.payload,
            Record::Edge(edge) => &edge.payload,
        }
    }
}

/// Private, mutable copy of one version's words.
#[derive(Clone, Debug)]
pub(crate) struct RecordBuf {
    words: Vec<u64>,
}

impl RecordBuf {
    pub fn new(kind: ObjectKind, id: ObjectId, type_id: TypeId, payload: &[u8]) -> Self {
        let fixed = fixed_words(kind);
        let mut words = vec![0u64; fixed + payload_words(payload.len())];
        words[layout::KIND] = kind.tag();
        words[layout::ID] = id.0;
        words[layout::TYPE] = type_id.0;
        words[layout::PAYLOAD_LEN] = payload.len() as u64;
        pack_payload(&mut words[fixed..], payload);
        Self { words }
    }

    /// Copies the whole version at `offset` out of the heap.
    pub fn load(region: &Region, offset: HeapOffset) -> Result<Self> {
        let header = Header::load(region, offset)?;
        let payload_len = usize::try_from(header.payload_len)
            .map_err(|_| SombraError::Corruption("payload length overflow"))?;
        let total = fixed_words(header.kind) + payload_words(payload_len);
        let words = region
            .heap(offset, total)?
            .iter()
            .map(|word| word.load(Ordering::Relaxed))
            .collect();
        Ok(Self { words })
    }

    /// Writes this version into a freshly reserved heap region.
    pub fn store(&self, region: &Region, offset: HeapOffset) -> Result<()> {
        let target: &[AtomicU64] = region.heap(offset, self.words.len())?;
        for (slot, word) in target.iter().zip(&self.words) {
            slot.store(*word, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn len_words(&self) -> u64 {
        self.words.len() as u64
    }

    pub fn kind(&self) -> Result<ObjectKind> {
        ObjectKind::from_tag(self.words[layout::KIND])
    }

    pub fn get(&self, field: usize) -> u64 {
        self.words[field]
    }

    pub fn set(&mut self, field: usize, value: u64) {
        self.words[field] = value;
    }

    /// Same header and links with `payload` in place of the current payload.
    pub fn with_payload(&self, payload: &[u8]) -> Result<Self> {
        let fixed = fixed_words(self.kind()?);
        let mut words = vec![0u64; fixed + payload_words(payload.len())];
        words[..fixed].copy_from_slice(&self.words[..fixed]);
        words[layout::PAYLOAD_LEN] = payload.len() as u64;
        pack_payload(&mut words[fixed..], payload);
        Ok(Self { words })
    }

    fn header(&self) -> Result<Header> {
        Ok(Header {
            kind: self.kind()?,
            id: ObjectId(self.words[layout::ID]),
            type_id: TypeId(self.words[layout::TYPE]),
            payload_len: self.words[layout::PAYLOAD_LEN],
        })
    }

    fn payload(&self, kind: ObjectKind) -> Result<Vec<u8>> {
        let fixed = fixed_words(kind);
        let len = self.words[layout::PAYLOAD_LEN] as usize;
        if payload_words(len) != self.words.len() - fixed {
            return Err(SombraError::Corruption("payload length disagrees with record size"));
        }
        let mut bytes = Vec::with_capacity(len);
        for word in &self.words[fixed..] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.truncate(len);
        Ok(bytes)
    }

    fn link(&self, field: usize, kind: ObjectKind) -> Option<Handle> {
        RowId::from_word(self.words[field]).map(|row| Handle::new(row, kind))
    }

    pub fn into_record(self) -> Result<Record> {
        let header = self.header()?;
        match header.kind {
            ObjectKind::Node => Ok(Record::Node(NodeRecord {
                first_edge: self.link(layout::NODE_FIRST_EDGE, ObjectKind::Edge),
                second_edge: self.link(layout::NODE_SECOND_EDGE, ObjectKind::Edge),
                payload: self.payload(ObjectKind::Node)?,
                header,
            })),
            ObjectKind::Edge => {
                let first_node = self
                    .link(layout::EDGE_FIRST_NODE, ObjectKind::Node)
                    .ok_or(SombraError::Corruption("edge without first endpoint"))?;
                let second_node = self
                    .link(layout::EDGE_SECOND_NODE, ObjectKind::Node)
                    .ok_or(SombraError::Corruption("edge without second endpoint"))?;
                Ok(Record::Edge(EdgeRecord {
                    first: ObjectId(self.words[layout::EDGE_FIRST_ID]),
                    second: ObjectId(self.words[layout::EDGE_SECOND_ID]),
                    first_node,
                    second_node,
                    next_first: self.link(layout::EDGE_NEXT_FIRST, ObjectKind::Edge),
                    next_second: self.link(layout::EDGE_NEXT_SECOND, ObjectKind::Edge),
                    payload: self.payload(ObjectKind::Edge)?,
                    header,
                }))
            }
        }
    }
}

fn pack_payload(dst: &mut [u64], payload: &[u8]) {
    for (word, chunk) in dst.iter_mut().zip(payload.chunks(WORD_BYTES)) {
        let mut bytes = [0u8; WORD_BYTES];
        bytes[..chunk.len()].copy_from_slice(chunk);
        *word = u64::from_le_bytes(bytes);
    }
}
