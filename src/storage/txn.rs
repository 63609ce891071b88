//! Sessions and the optimistic transaction protocol.
//!
//! A transaction copies the committed offset table at begin and works on that
//! private copy. Every new object version is written to freshly reserved heap
//! words and recorded as `(row, old offset, new offset)` in the transaction
//! log. Ids of created objects stay in a private map until commit.
//!
//! Commit takes the commit lock exclusively and checks that each touched row
//! still holds the offset this transaction first saw and that no other
//! transaction committed a live object under one of its new ids. It then
//! publishes the log in order and points the identifier index at the new
//! rows. Nothing becomes visible to other transactions before that point.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::types::{ObjectId, ObjectKind, Result, RowId, SombraError, TypeId};

use super::engine::Engine;
use super::handle::Handle;
use super::index::Slot;
use super::metrics::StorageMetrics;
use super::record::{Header, RecordBuf};
use super::region::{HeapOffset, OffsetSnapshot, Region};

/// A thread's view of the engine, holding at most one open transaction.
///
/// Data access (creating, opening, reading, updating or removing objects)
/// fails with [`SombraError::TxNotOpen`] unless a transaction has been begun.
/// A session that is dropped with a transaction still open rolls it back.
pub struct Session {
    engine: Engine,
    tx: Option<ActiveTx>,
}

#[derive(Clone, Copy, Debug)]
struct LogRecord {
    row: RowId,
    old: HeapOffset,
    new: HeapOffset,
}

struct ActiveTx {
    id: u64,
    snapshot: OffsetSnapshot,
    log: Vec<LogRecord>,
    // index key -> (entry, row) for objects created by this transaction
    creations: FxHashMap<u64, (Slot, RowId)>,
    // (index key, row) pairs soft-deleted once the commit is validated
    releases: Vec<(u64, RowId)>,
}

impl ActiveTx {
    fn record(&mut self, row: RowId, new: HeapOffset) {
        let old = self.snapshot.get(row);
        self.log.push(LogRecord { row, old, new });
        self.snapshot.set(row, new);
    }

    /// Row this transaction created under `key`, if it is still live here.
    fn created(&self, key: u64) -> Option<RowId> {
        self.creations
            .get(&key)
            .map(|(_, row)| *row)
            .filter(|row| self.snapshot.is_live(*row))
    }

    /// Creations not removed again by this same transaction.
    fn live_creations(&self) -> impl Iterator<Item = (Slot, RowId)> + '_ {
        self.creations
            .values()
            .copied()
            .filter(|(_, row)| self.snapshot.is_live(*row))
    }

    /// Returns the first row whose committed state moved since this
    /// transaction read it, or whose id another transaction committed first.
    ///
    /// Must run under the exclusive commit lock.
    fn validate(&self, region: &Region) -> Option<RowId> {
        let shared = region.committed_offsets();
        let committed = |row: RowId| shared.get(row.0 as usize).map(|w| w.load(Ordering::Acquire));
        let mut touched = FxHashSet::default();
        for record in &self.log {
            if touched.insert(record.row) && committed(record.row) != Some(record.old.0) {
                return Some(record.row);
            }
        }
        let index = region.index();
        for (slot, row) in self.live_creations() {
            let holder = index.row(slot);
            if holder.is_null() || holder == row {
                continue;
            }
            let holder_live = committed(holder).is_some_and(|offset| offset != 0);
            let removed_here = touched.contains(&holder) && self.snapshot.get(holder).is_empty();
            if holder_live && !removed_here {
                return Some(row);
            }
        }
        None
    }

    /// Writes the log into the shared offset table, then points index
    /// entries at created rows and clears the entries of removed ones.
    fn publish(&self, region: &Region) {
        let shared = region.committed_offsets();
        for record in &self.log {
            shared[record.row.0 as usize].store(record.new.0, Ordering::Release);
        }
        let index = region.index();
        for (slot, row) in self.live_creations() {
            index.claim(slot, row);
        }
        for (key, row) in &self.releases {
            index.remove(*key, *row);
        }
    }
}

/// A set of changes applied to a transaction as one unit.
///
/// Every fallible step (log capacity, heap reservation) runs before the
/// transaction state is touched, so a failed operation leaves the
/// transaction exactly as it was.
#[derive(Default)]
pub(crate) struct Mutation {
    writes: Vec<(RowId, RecordBuf)>,
    removal: Option<(RowId, u64)>,
    claim: Option<(Reservation, RowId)>,
}

/// Index entry set aside for an object about to be created.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Reservation {
    key: u64,
    slot: Slot,
}

impl Mutation {
    /// Adds a brand new version for `row`.
    pub fn insert(&mut self, row: RowId, buf: RecordBuf) {
        self.writes.push((row, buf));
    }

    /// Pending version of `row`, copied from its current version on first use.
    pub fn patch(&mut self, session: &Session, row: RowId) -> Result<&mut RecordBuf> {
        let pos = match self.writes.iter().position(|(r, _)| *r == row) {
            Some(pos) => pos,
            None => {
                let buf = session.load(row)?;
                self.writes.push((row, buf));
                self.writes.len() - 1
            }
        };
        Ok(&mut self.writes[pos].1)
    }

    /// Publishes `row` under the reserved id at commit.
    pub fn claim(&mut self, reservation: Reservation, row: RowId) {
        self.claim = Some((reservation, row));
    }

    /// Transitions `row` to removed and soft-deletes `key` at commit.
    pub fn remove(&mut self, row: RowId, key: u64) {
        self.removal = Some((row, key));
    }

    fn log_records(&self) -> usize {
        self.writes.len() + usize::from(self.removal.is_some())
    }
}

impl Session {
    pub(crate) fn new(engine: Engine) -> Self {
        Self { engine, tx: None }
    }

    /// Engine this session belongs to.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns true while a transaction is open.
    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    /// Identifier of the open transaction, if any.
    pub fn tx_id(&self) -> Option<u64> {
        self.tx.as_ref().map(|tx| tx.id)
    }

    /// Starts a transaction.
    ///
    /// Copies the committed offset table under the shared commit lock; the
    /// transaction reads from that copy for its whole lifetime.
    ///
    /// # Errors
    /// * [`SombraError::TxAlreadyOpen`] - a transaction is already open
    /// * [`SombraError::LockContention`] - the shared lock was not granted in time
    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(SombraError::TxAlreadyOpen);
        }
        let inner = self.engine.inner();
        let snapshot = inner
            .region
            .snapshot(inner.opts.lock_timeout_duration())?;
        let id = inner.next_tx.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(tx_id = id, "transaction started");
        self.tx = Some(ActiveTx {
            id,
            snapshot,
            log: Vec::new(),
            creations: FxHashMap::default(),
            releases: Vec::new(),
        });
        Ok(())
    }

    /// Validates and publishes the open transaction.
    ///
    /// # Errors
    /// * [`SombraError::TxNotOpen`] - no transaction is open
    /// * [`SombraError::UpdateConflict`] - another transaction committed a
    ///   change to a row this one touched; the transaction is closed and none
    ///   of its writes are applied
    /// * [`SombraError::LockContention`] - the exclusive lock was not granted
    ///   in time; the transaction stays open and may be retried or rolled back
    pub fn commit_transaction(&mut self) -> Result<()> {
        let inner = Arc::clone(self.engine.inner());
        let region = &inner.region;
        let tx = self.tx.take().ok_or(SombraError::TxNotOpen)?;
        let guard = match region
            .lock()
            .acquire_exclusive(inner.opts.lock_timeout_duration())
        {
            Ok(guard) => guard,
            Err(err) => {
                warn!(tx_id = tx.id, error = %err, "commit could not take the commit lock");
                self.tx = Some(tx);
                return Err(err);
            }
        };
        if let Some(row) = tx.validate(region) {
            drop(guard);
            inner.metrics.tx_conflicted();
            warn!(tx_id = tx.id, row = %row, "transaction aborted by update conflict");
            return Err(SombraError::UpdateConflict);
        }
        tx.publish(region);
        drop(guard);
        inner.metrics.tx_committed();
        info!(tx_id = tx.id, records = tx.log.len(), "transaction committed");
        Ok(())
    }

    /// Discards the open transaction's writes.
    ///
    /// Nothing it wrote was published, so only its private state is dropped.
    /// Heap words and row handles it reserved are not reclaimed.
    pub fn rollback_transaction(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(SombraError::TxNotOpen)?;
        self.discard(tx);
        Ok(())
    }

    fn discard(&self, tx: ActiveTx) {
        let inner = self.engine.inner();
        inner.metrics.tx_rolled_back();
        warn!(tx_id = tx.id, records = tx.log.len(), "transaction rolled back");
    }

    fn tx(&self) -> Result<&ActiveTx> {
        self.tx.as_ref().ok_or(SombraError::TxNotOpen)
    }

    fn region(&self) -> &Region {
        &self.engine.inner().region
    }

    pub(crate) fn metrics(&self) -> &dyn StorageMetrics {
        self.engine.inner().metrics.as_ref()
    }

    /// Offset of `row`'s current version in this transaction's view.
    pub(crate) fn offset(&self, row: RowId) -> Result<HeapOffset> {
        Ok(self.tx()?.snapshot.get(row))
    }

    pub(crate) fn is_live(&self, row: RowId) -> Result<bool> {
        Ok(self.tx()?.snapshot.is_live(row))
    }

    /// Copies `row`'s current version out of the heap.
    pub(crate) fn load(&self, row: RowId) -> Result<RecordBuf> {
        let offset = self.offset(row)?;
        if offset.is_empty() {
            return Err(SombraError::Invalid(
                "handle does not resolve to a live object",
            ));
        }
        RecordBuf::load(self.region(), offset)
    }

    /// Type of `row`'s object, read from the version this transaction
    /// removed when the row is no longer live here.
    pub(crate) fn type_of(&self, row: RowId) -> Result<TypeId> {
        let tx = self.tx()?;
        let mut offset = tx.snapshot.get(row);
        if offset.is_empty() {
            offset = tx
                .log
                .iter()
                .rev()
                .find(|record| record.row == row && !record.old.is_empty())
                .map(|record| record.old)
                .unwrap_or_default();
        }
        if offset.is_empty() {
            return Err(SombraError::Invalid(
                "handle does not resolve to a live object",
            ));
        }
        Ok(Header::load(self.region(), offset)?.type_id)
    }

    /// Resolves `id` through the identifier index.
    ///
    /// The index is shared and unversioned: once another transaction's
    /// removal of `id` commits, this returns `None` even though this
    /// transaction's snapshot (and so [`Handle::find_first`]) still sees the
    /// object.
    pub(crate) fn find(&self, id: ObjectId, kind: ObjectKind) -> Result<Option<Handle>> {
        let key = id.validate()?.index_key(kind);
        let tx = self.tx()?;
        let row = tx.created(key).or_else(|| {
            self.region()
                .index()
                .find(key, |row| tx.snapshot.is_live(row))
        });
        Ok(row.map(|row| Handle::new(row, kind)))
    }

    /// Finds or creates the index entry for a new object with `id`.
    ///
    /// The entry is only pointed at the new row when the transaction
    /// commits; until then the creation is visible to this session alone.
    pub(crate) fn reserve_id(&self, id: ObjectId, kind: ObjectKind) -> Result<Reservation> {
        let key = id.validate()?.index_key(kind);
        let tx = self.tx()?;
        if tx.created(key).is_some() {
            return Err(SombraError::DuplicateId(id.0));
        }
        let slot = self
            .region()
            .index()
            .insert(key, |row| tx.snapshot.is_live(row))?;
        Ok(Reservation { key, slot })
    }

    pub(crate) fn allocate_row(&self) -> Result<RowId> {
        self.tx()?;
        self.region().allocate_row_id()
    }

    /// First live row at or after `start` holding a `kind` object of `type_id`.
    pub(crate) fn scan_from(
        &self,
        start: RowId,
        kind: ObjectKind,
        type_id: TypeId,
    ) -> Result<Option<Handle>> {
        let tx = self.tx()?;
        let region = self.region();
        let end = region.row_count();
        for row in start.0.max(1)..=end {
            let offset = tx.snapshot.get(RowId(row));
            if offset.is_empty() {
                continue;
            }
            let header = Header::load(region, offset)?;
            if header.kind == kind && header.type_id == type_id {
                return Ok(Some(Handle::new(RowId(row), kind)));
            }
        }
        Ok(None)
    }

    /// Applies `mutation` to the open transaction.
    pub(crate) fn apply(&mut self, mutation: Mutation) -> Result<()> {
        let inner = Arc::clone(self.engine.inner());
        let tx = self.tx.as_mut().ok_or(SombraError::TxNotOpen)?;
        if tx.log.len() + mutation.log_records() > inner.opts.max_log_records {
            return Err(SombraError::OutOfMemory("transaction log"));
        }
        let region = &inner.region;
        let offsets = mutation
            .writes
            .iter()
            .map(|(_, buf)| region.allocate_words(buf.len_words()))
            .collect::<Result<Vec<_>>>()?;
        for ((_, buf), offset) in mutation.writes.iter().zip(&offsets) {
            buf.store(region, *offset)?;
        }
        for ((row, _), offset) in mutation.writes.iter().zip(offsets) {
            tx.record(*row, offset);
        }
        if let Some((row, key)) = mutation.removal {
            tx.record(row, HeapOffset::EMPTY);
            tx.releases.push((key, row));
        }
        if let Some((reservation, row)) = mutation.claim {
            tx.creations.insert(reservation.key, (reservation.slot, row));
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            warn!(tx_id = tx.id, "session dropped with an open transaction");
            self.discard(tx);
        }
    }
}
