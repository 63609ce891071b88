//! Graph storage engine over shared memory.
//!
//! Nodes and edges live as immutable versions in a shared data heap. A shared
//! offset table maps each row handle to its current version, and an
//! identifier index maps external ids to row handles. Transactions write new
//! versions privately and publish them by swapping offset table entries at
//! commit.

/// Adjacency list traversal.
pub mod adjacency;
/// Edge operations.
pub mod edge;
/// Node operations.
pub mod node;

mod engine;
mod handle;
mod index;
mod metrics;
mod options;
mod record;
mod region;
mod txn;

/// Engine lifecycle and usage statistics.
pub use engine::{Engine, EngineStats};

/// Object handles and type scans.
pub use handle::{Handle, TypeScan};

pub use adjacency::{Dir, EdgeCursor};

/// Metrics collection.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StorageMetrics};

/// Engine configuration.
pub use options::{
    EngineOptions, DEFAULT_DATA_SEGMENT, DEFAULT_HASH_BUCKETS, DEFAULT_LOCK_TIMEOUT_MS,
    DEFAULT_MAX_LOG_RECORDS, DEFAULT_MAX_ROWS, DEFAULT_OFFSETS_SEGMENT,
};

pub use record::{EdgeRecord, Header, NodeRecord, Record};
pub use region::{Geometry, HeapOffset};
pub(crate) use region::Region;
pub use txn::Session;
