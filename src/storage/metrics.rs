use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::adjacency::Dir;

/// Trait for tracking engine operations.
///
/// Implementations collect counts of graph mutations and transaction outcomes.
/// Calls happen on the hot path, so implementations should be cheap.
pub trait StorageMetrics: Send + Sync {
    /// Records the creation of a node.
    fn node_created(&self);

    /// Records the removal of a node.
    fn node_removed(&self);

    /// Records the creation of an edge.
    fn edge_created(&self);

    /// Records the removal of an edge.
    fn edge_removed(&self);

    /// Records a successful commit.
    fn tx_committed(&self);

    /// Records a commit rejected by conflict validation.
    fn tx_conflicted(&self);

    /// Records an explicit or implicit rollback.
    fn tx_rolled_back(&self);

    /// Records one adjacency list step in the given direction.
    fn adjacency_walk(&self, dir: Dir);
}

/// A no-op implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn node_created(&self) {}
    fn node_removed(&self) {}
    fn edge_created(&self) {}
    fn edge_removed(&self) {}
    fn tx_committed(&self) {}
    fn tx_conflicted(&self) {}
    fn tx_rolled_back(&self) {}
    fn adjacency_walk(&self, _dir: Dir) {}
}

/// A thread-safe counter-based implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of nodes created.
    pub nodes_created: AtomicU64,
    /// Number of nodes removed.
    pub nodes_removed: AtomicU64,
    /// Number of edges created.
    pub edges_created: AtomicU64,
    /// Number of edges removed.
    pub edges_removed: AtomicU64,
    /// Number of committed transactions.
    pub commits: AtomicU64,
    /// Number of transactions aborted by conflict validation.
    pub conflicts: AtomicU64,
    /// Number of rolled back transactions.
    pub rollbacks: AtomicU64,
    /// Adjacency steps along first-endpoint lists.
    pub adjacency_steps_first: AtomicU64,
    /// Adjacency steps along second-endpoint lists.
    pub adjacency_steps_second: AtomicU64,
}

impl StorageMetrics for CounterMetrics {
    fn node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    fn node_removed(&self) {
        self.nodes_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_created(&self) {
        self.edges_created.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_removed(&self) {
        self.edges_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn tx_committed(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    fn tx_conflicted(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    fn tx_rolled_back(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    fn adjacency_walk(&self, dir: Dir) {
        match dir {
            Dir::First => {
                self.adjacency_steps_first.fetch_add(1, Ordering::Relaxed);
            }
            Dir::Second => {
                self.adjacency_steps_second.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}
