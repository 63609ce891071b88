#![forbid(unsafe_code)]
//! Identifier newtypes and the crate-wide error type.

use std::fmt;

/// Bit reserved for marking edge ids inside the identifier index.
pub const EDGE_ID_BIT: u64 = 1 << 63;

/// Externally assigned identifier of a node or an edge.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ObjectId(pub u64);

/// Dense, 1-based slot number in the offset table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct RowId(pub u64);

/// Caller-defined record type tag.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u64);

/// Shape of a stored record.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ObjectKind {
    /// A graph node.
    Node,
    /// A graph edge between two nodes.
    Edge,
}

impl ObjectKind {
    pub(crate) const fn tag(self) -> u64 {
        match self {
            ObjectKind::Node => 1,
            ObjectKind::Edge => 2,
        }
    }

    pub(crate) fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            1 => Ok(ObjectKind::Node),
            2 => Ok(ObjectKind::Edge),
            _ => Err(SombraError::Corruption("unknown record kind tag")),
        }
    }
}

impl ObjectId {
    /// Rejects ids outside `1..2^63`.
    ///
    /// Zero marks an empty index slot and the top bit tags edges, so neither
    /// may come from callers.
    pub fn validate(self) -> Result<Self> {
        if self.0 == 0 || self.0 & EDGE_ID_BIT != 0 {
            return Err(SombraError::InvalidId(self.0));
        }
        Ok(self)
    }

    /// Key under which this id is stored in the identifier index.
    pub(crate) fn index_key(self, kind: ObjectKind) -> u64 {
        match kind {
            ObjectKind::Node => self.0,
            ObjectKind::Edge => self.0 | EDGE_ID_BIT,
        }
    }
}

impl RowId {
    /// Row handle that never resolves to an object.
    pub const NULL: RowId = RowId(0);

    /// Returns true for the null row handle.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn from_word(word: u64) -> Option<RowId> {
        if word == 0 {
            None
        } else {
            Some(RowId(word))
        }
    }
}

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        ObjectId(value)
    }
}

impl From<u64> for TypeId {
    fn from(value: u64) -> Self {
        TypeId(value)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by the engine.
#[derive(thiserror::Error, Debug)]
pub enum SombraError {
    /// Underlying I/O failure outside of engine setup.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Shared segments could not be opened, sized, mapped or locked.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    /// Data access attempted without an active transaction.
    #[error("begin transaction before performing data access")]
    TxNotOpen,
    /// `begin_transaction` called while a transaction is still open.
    #[error("a transaction is already open in this session")]
    TxAlreadyOpen,
    /// Commit-time validation found a row changed by another transaction.
    #[error("transaction aborted due to serialization error")]
    UpdateConflict,
    /// The id already maps to a live object.
    #[error("object with id {0} already exists")]
    DuplicateId(u64),
    /// A fixed-capacity pool is exhausted.
    #[error("out of memory: {0} exhausted")]
    OutOfMemory(&'static str),
    /// Node removal attempted while edges still reference it.
    #[error("cannot remove node {0}: dependent edges exist")]
    DependentEdgesExist(u64),
    /// Edge creation referenced an endpoint that does not exist.
    #[error("id {0} is either invalid or the node is not found")]
    InvalidNodeId(u64),
    /// Caller supplied an id outside `1..2^63`.
    #[error("invalid object id {0}: ids must be in 1..2^63")]
    InvalidId(u64),
    /// The commit lock could not be acquired within the configured wait.
    #[error("lock contention: gave up after {waited_ms}ms")]
    LockContention {
        /// Milliseconds spent waiting before giving up.
        waited_ms: u64,
    },
    /// Segment contents violate the expected layout.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// API misuse.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Options could not be parsed.
    #[error("config: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SombraError>;
