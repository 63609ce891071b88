//! Shared region manager: the offset table and data heap segments.
//!
//! The data segment is laid out as
//!
//! ```text
//! [ header: 8 words ][ index entries: (buckets + overflow) * 3 words ][ heap ]
//! ```
//!
//! and the offsets segment holds `max_rows + 1` words, word `r` being the heap
//! offset of row `r`'s current version (zero for "no live object"). Row 0 is
//! never allocated.

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::primitives::concurrency::CommitLock;
use crate::primitives::shm::SharedSegment;
use crate::types::{Result, RowId, SombraError};

use super::index::IdIndex;
use super::options::EngineOptions;

pub(crate) const SEGMENT_MAGIC: u64 = u64::from_be_bytes(*b"SOMBSHM1");
pub(crate) const HEADER_WORDS: usize = 8;
pub(crate) const INDEX_ENTRY_WORDS: u64 = 3;

mod hdr {
    pub const MAGIC: usize = 0;
    pub const MAX_ROWS: usize = 1;
    pub const HASH_BUCKETS: usize = 2;
    pub const OVERFLOW_ENTRIES: usize = 3;
    pub const HEAP_WORDS: usize = 4;
    pub const ROW_COUNT: usize = 5;
    pub const OVERFLOW_COUNT: usize = 6;
    pub const HEAP_TOP: usize = 7;
}

/// Fixed capacities of a segment pair, chosen by the creating process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Geometry {
    /// Maximum number of row handles.
    pub max_rows: u64,
    /// Home buckets in the identifier index.
    pub hash_buckets: u64,
    /// Overflow entries in the identifier index.
    pub overflow_entries: u64,
    /// Data heap size in words.
    pub heap_words: u64,
}

impl Geometry {
    pub(crate) fn from_options(opts: &EngineOptions) -> Self {
        Self {
            max_rows: opts.max_rows,
            hash_buckets: opts.hash_buckets,
            overflow_entries: opts.overflow_entries,
            heap_words: opts.heap_words,
        }
    }

    fn index_words(&self) -> Option<u64> {
        self.hash_buckets
            .checked_add(self.overflow_entries)?
            .checked_mul(INDEX_ENTRY_WORDS)
    }

    /// Word counts of the data and offsets segments, or `None` when either
    /// does not fit a mapping.
    pub(crate) fn segment_words(&self) -> Option<(u64, u64)> {
        let data = (HEADER_WORDS as u64)
            .checked_add(self.index_words()?)?
            .checked_add(self.heap_words)?;
        let offsets = self.max_rows.checked_add(1)?;
        for words in [data, offsets] {
            let bytes = words.checked_mul(std::mem::size_of::<u64>() as u64)?;
            usize::try_from(bytes).ok()?;
        }
        Some((data, offsets))
    }
}

/// 1-based word position of an object version inside the data heap.
///
/// Zero is the "empty" offset stored for rows without a live object.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct HeapOffset(pub u64);

impl HeapOffset {
    /// The empty offset.
    pub const EMPTY: HeapOffset = HeapOffset(0);

    /// Returns true for the empty offset.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

pub(crate) struct Region {
    geometry: Geometry,
    offsets: SharedSegment,
    data: SharedSegment,
    lock: CommitLock,
    index_base: usize,
    heap_base: usize,
}

impl Region {
    /// Creates (or truncates) both segments and writes the geometry header.
    pub fn create(opts: &EngineOptions) -> Result<Self> {
        opts.validate()?;
        let geometry = Geometry::from_options(opts);
        let (data_words, offsets_words) = geometry
            .segment_words()
            .ok_or(SombraError::Invalid("segment capacities overflow"))?;
        fs::create_dir_all(&opts.dir).map_err(|err| {
            SombraError::Unavailable(format!("create {}: {err}", opts.dir.display()))
        })?;
        let data_path = opts.data_path();
        if let Ok(existing) = SharedSegment::open(&data_path) {
            if existing.words()[hdr::MAGIC].load(Ordering::Acquire) == SEGMENT_MAGIC {
                warn!(
                    path = %data_path.display(),
                    "reinitializing segments that already hold an engine"
                );
            }
        }
        let data = SharedSegment::create(&data_path, data_words)?;
        let offsets = SharedSegment::create(opts.offsets_path(), offsets_words)?;
        let words = data.words();
        words[hdr::MAX_ROWS].store(geometry.max_rows, Ordering::Relaxed);
        words[hdr::HASH_BUCKETS].store(geometry.hash_buckets, Ordering::Relaxed);
        words[hdr::OVERFLOW_ENTRIES].store(geometry.overflow_entries, Ordering::Relaxed);
        words[hdr::HEAP_WORDS].store(geometry.heap_words, Ordering::Relaxed);
        words[hdr::MAGIC].store(SEGMENT_MAGIC, Ordering::Release);
        info!(
            dir = %opts.dir.display(),
            max_rows = geometry.max_rows,
            heap_words = geometry.heap_words,
            "shared segments created"
        );
        Self::assemble(geometry, offsets, data)
    }

    /// Maps segments created by another engine, reading their geometry.
    pub fn attach(opts: &EngineOptions) -> Result<Self> {
        let data = SharedSegment::open(opts.data_path())?;
        if data.len_words() < HEADER_WORDS {
            return Err(SombraError::Unavailable("data segment truncated".into()));
        }
        let words = data.words();
        if words[hdr::MAGIC].load(Ordering::Acquire) != SEGMENT_MAGIC {
            return Err(SombraError::Unavailable(
                "data segment is not initialised".into(),
            ));
        }
        let geometry = Geometry {
            max_rows: words[hdr::MAX_ROWS].load(Ordering::Relaxed),
            hash_buckets: words[hdr::HASH_BUCKETS].load(Ordering::Relaxed),
            overflow_entries: words[hdr::OVERFLOW_ENTRIES].load(Ordering::Relaxed),
            heap_words: words[hdr::HEAP_WORDS].load(Ordering::Relaxed),
        };
        let expected = geometry.segment_words().filter(|_| geometry.hash_buckets != 0);
        let Some((data_words, offsets_words)) = expected else {
            return Err(SombraError::Unavailable(
                "data segment header holds impossible capacities".into(),
            ));
        };
        if data.len_words() as u64 != data_words {
            return Err(SombraError::Unavailable(
                "data segment size does not match its header".into(),
            ));
        }
        let offsets = SharedSegment::open(opts.offsets_path())?;
        if offsets.len_words() as u64 != offsets_words {
            return Err(SombraError::Unavailable(
                "offsets segment size does not match the data segment".into(),
            ));
        }
        info!(dir = %opts.dir.display(), "attached to shared segments");
        Self::assemble(geometry, offsets, data)
    }

    fn assemble(geometry: Geometry, offsets: SharedSegment, data: SharedSegment) -> Result<Self> {
        let lock_file = offsets.file().try_clone().map_err(|err| {
            SombraError::Unavailable(format!("duplicate offsets descriptor: {err}"))
        })?;
        let index_words = geometry
            .index_words()
            .and_then(|words| usize::try_from(words).ok())
            .ok_or_else(|| SombraError::Unavailable("index area does not fit a mapping".into()))?;
        let index_base = HEADER_WORDS;
        let heap_base = index_base + index_words;
        Ok(Self {
            geometry,
            offsets,
            data,
            lock: CommitLock::new(lock_file),
            index_base,
            heap_base,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn header(&self, slot: usize) -> &AtomicU64 {
        &self.data.words()[slot]
    }

    /// Number of row handles handed out so far.
    pub fn row_count(&self) -> u64 {
        self.header(hdr::ROW_COUNT).load(Ordering::Acquire)
    }

    /// Words of the data heap reserved so far.
    pub fn heap_used(&self) -> u64 {
        self.header(hdr::HEAP_TOP).load(Ordering::Acquire)
    }

    /// Atomically hands out the next row handle.
    pub fn allocate_row_id(&self) -> Result<RowId> {
        let max = self.geometry.max_rows;
        self.header(hdr::ROW_COUNT)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < max).then_some(count + 1)
            })
            .map(|prev| RowId(prev + 1))
            .map_err(|_| SombraError::OutOfMemory("row handles"))
    }

    /// Atomically reserves `words` words at the end of the data heap.
    pub fn allocate_words(&self, words: u64) -> Result<HeapOffset> {
        let limit = self.geometry.heap_words;
        self.header(hdr::HEAP_TOP)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |top| {
                top.checked_add(words).filter(|end| *end <= limit)
            })
            .map(|prev| HeapOffset(prev + 1))
            .map_err(|_| SombraError::OutOfMemory("data heap"))
    }

    /// Bounds-checked view of `len` heap words starting at `offset`.
    pub fn heap(&self, offset: HeapOffset, len: usize) -> Result<&[AtomicU64]> {
        if offset.is_empty() {
            return Err(SombraError::Corruption("dereferenced empty heap offset"));
        }
        let start = offset.0 - 1;
        let end = start
            .checked_add(len as u64)
            .ok_or(SombraError::Corruption("heap range overflow"))?;
        if end > self.geometry.heap_words {
            return Err(SombraError::Corruption("heap range out of bounds"));
        }
        self.data.range(self.heap_base + start as usize, len)
    }

    /// The identifier index stored between the header and the heap.
    pub fn index(&self) -> IdIndex<'_> {
        IdIndex::new(
            &self.data.words()[self.index_base..self.heap_base],
            self.geometry.hash_buckets,
            self.geometry.overflow_entries,
            self.header(hdr::OVERFLOW_COUNT),
        )
    }

    /// The shared offset table every commit publishes into.
    pub fn committed_offsets(&self) -> &[AtomicU64] {
        self.offsets.words()
    }

    pub fn lock(&self) -> &CommitLock {
        &self.lock
    }

    /// Copies the committed offset table under the shared lock.
    pub fn snapshot(&self, timeout: Duration) -> Result<OffsetSnapshot> {
        let _guard = self.lock.acquire_shared(timeout)?;
        let rows = self.row_count().min(self.geometry.max_rows) as usize;
        let offsets = self.committed_offsets()[..=rows]
            .iter()
            .map(|word| word.load(Ordering::Acquire))
            .collect();
        Ok(OffsetSnapshot { offsets })
    }

    /// Number of rows with a live object in the committed table.
    pub fn committed_live_rows(&self) -> u64 {
        let rows = self.row_count().min(self.geometry.max_rows) as usize;
        self.committed_offsets()[1..=rows]
            .iter()
            .filter(|word| word.load(Ordering::Acquire) != 0)
            .count() as u64
    }
}

/// A transaction's private copy of the offset table.
///
/// Rows allocated after the copy was taken read as empty until this
/// transaction writes them.
#[derive(Debug, Default)]
pub(crate) struct OffsetSnapshot {
    offsets: Vec<u64>,
}

impl OffsetSnapshot {
    pub fn get(&self, row: RowId) -> HeapOffset {
        self.offsets
            .get(row.0 as usize)
            .copied()
            .map(HeapOffset)
            .unwrap_or_default()
    }

    pub fn set(&mut self, row: RowId, offset: HeapOffset) {
        let idx = row.0 as usize;
        if idx >= self.offsets.len() {
            self.offsets.resize(idx + 1, 0);
        }
        self.offsets[idx] = offset.0;
    }

    pub fn is_live(&self, row: RowId) -> bool {
        !row.is_null() && !self.get(row).is_empty()
    }
}
