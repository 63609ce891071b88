use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::types::Result;

use super::metrics::{default_metrics, StorageMetrics};
use super::options::EngineOptions;
use super::region::{Geometry, Region};
use super::txn::Session;

/// Process-local handle on a shared segment pair.
///
/// An `Engine` owns the mappings of the offset table and the data heap plus
/// the commit lock. It is cheap to clone; every clone refers to the same
/// mappings. Transactions run inside [`Session`]s obtained from
/// [`Engine::session`].
///
/// # Example
///
/// ```rust
/// use sombra_shm::storage::{node, Engine, EngineOptions};
/// use sombra_shm::types::{ObjectId, TypeId};
///
/// let dir = tempfile::tempdir()?;
/// let engine = Engine::create(EngineOptions::new(dir.path()).max_rows(64))?;
/// let mut session = engine.session();
/// session.begin_transaction()?;
/// node::create(&mut session, ObjectId(1), TypeId(1), b"payload")?;
/// session.commit_transaction()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) region: Region,
    pub(crate) opts: EngineOptions,
    pub(crate) metrics: Arc<dyn StorageMetrics>,
    pub(crate) next_tx: AtomicU64,
}

/// Point-in-time usage figures for an attached segment pair.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct EngineStats {
    /// Capacities fixed when the segments were created.
    pub geometry: Geometry,
    /// Row handles handed out so far.
    pub rows_allocated: u64,
    /// Rows holding a live object in the committed offset table.
    pub live_rows: u64,
    /// Heap words reserved so far.
    pub heap_words_used: u64,
    /// Identifier index overflow entries in use.
    pub overflow_entries_used: u64,
}

impl Engine {
    /// Creates fresh segments when `create` is set, otherwise attaches to
    /// segments some other process created.
    pub fn init(opts: EngineOptions, create: bool) -> Result<Self> {
        let region = if create {
            Region::create(&opts)?
        } else {
            Region::attach(&opts)?
        };
        let metrics = opts.metrics.clone().unwrap_or_else(default_metrics);
        info!(
            offsets = %opts.offsets_path().display(),
            data = %opts.data_path().display(),
            create,
            "engine initialised"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                region,
                opts,
                metrics,
                next_tx: AtomicU64::new(0),
            }),
        })
    }

    /// Creates (or truncates) the segments named by `opts`.
    pub fn create(opts: EngineOptions) -> Result<Self> {
        Self::init(opts, true)
    }

    /// Attaches to existing segments named by `opts`.
    pub fn attach(opts: EngineOptions) -> Result<Self> {
        Self::init(opts, false)
    }

    /// Opens a session with no transaction in progress.
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    /// Options this engine was initialised with.
    pub fn options(&self) -> &EngineOptions {
        &self.inner.opts
    }

    /// Capacities of the attached segments.
    pub fn geometry(&self) -> Geometry {
        self.inner.region.geometry()
    }

    /// Reads current usage counters straight from shared memory.
    pub fn stats(&self) -> EngineStats {
        let region = &self.inner.region;
        EngineStats {
            geometry: region.geometry(),
            rows_allocated: region.row_count(),
            live_rows: region.committed_live_rows(),
            heap_words_used: region.heap_used(),
            overflow_entries_used: region.index().overflow_used(),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.inner.opts.dir)
            .field("geometry", &self.inner.region.geometry())
            .finish()
    }
}
