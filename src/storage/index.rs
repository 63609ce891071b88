//! Identifier index: a fixed-bucket hash table in the data segment mapping
//! object ids to row handles.
//!
//! Each entry is three words `[key, next, row]`. Entries `0..buckets` are home
//! buckets; the rest form an overflow pool handed out with a shared counter
//! and linked into chains with compare-and-swap. A key of zero marks an
//! unclaimed bucket. Entries are never unlinked: removal clears the row word
//! and a later insert of the same key reuses the entry.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Result, RowId, SombraError};

use super::region::INDEX_ENTRY_WORDS;

const KEY: usize = 0;
const NEXT: usize = 1;
const ROW: usize = 2;

/// Position of an entry in the index.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct Slot(pub u64);

pub(crate) struct IdIndex<'a> {
    words: &'a [AtomicU64],
    buckets: u64,
    overflow: u64,
    overflow_used: &'a AtomicU64,
}

impl<'a> IdIndex<'a> {
    pub fn new(
        words: &'a [AtomicU64],
        buckets: u64,
        overflow: u64,
        overflow_used: &'a AtomicU64,
    ) -> Self {
        debug_assert_eq!(
            words.len() as u64,
            (buckets + overflow) * INDEX_ENTRY_WORDS
        );
        Self {
            words,
            buckets,
            overflow,
            overflow_used,
        }
    }

    fn word(&self, slot: Slot, field: usize) -> &AtomicU64 {
        &self.words[(slot.0 * INDEX_ENTRY_WORDS) as usize + field]
    }

    fn home(&self, key: u64) -> Slot {
        Slot(key % self.buckets)
    }

    /// Finds or creates the entry for `key`.
    ///
    /// Fails with [`SombraError::DuplicateId`] when the entry's row is still
    /// live according to `is_live`; soft-deleted entries are handed back for
    /// reuse.
    pub fn insert(&self, key: u64, is_live: impl Fn(RowId) -> bool) -> Result<Slot> {
        debug_assert_ne!(key, 0);
        let mut slot = self.home(key);
        let key_word = self.word(slot, KEY);
        if key_word.load(Ordering::Acquire) == 0
            && key_word
                .compare_exchange(0, key, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Ok(slot);
        }
        let mut fresh: Option<Slot> = None;
        loop {
            if self.word(slot, KEY).load(Ordering::Acquire) == key {
                let row = RowId(self.word(slot, ROW).load(Ordering::Acquire));
                if !row.is_null() && is_live(row) {
                    return Err(SombraError::DuplicateId(key & !crate::types::EDGE_ID_BIT));
                }
                return Ok(slot);
            }
            let next = self.word(slot, NEXT).load(Ordering::Acquire);
            if next != 0 {
                slot = Slot(next);
                continue;
            }
            let candidate = match fresh {
                Some(candidate) => candidate,
                None => {
                    let candidate = self.allocate_overflow()?;
                    self.word(candidate, KEY).store(key, Ordering::Release);
                    fresh = Some(candidate);
                    candidate
                }
            };
            if self
                .word(slot, NEXT)
                .compare_exchange(0, candidate.0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(candidate);
            }
        }
    }

    fn allocate_overflow(&self) -> Result<Slot> {
        let cap = self.overflow;
        self.overflow_used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < cap).then_some(used + 1)
            })
            .map(|prev| Slot(self.buckets + prev))
            .map_err(|_| SombraError::OutOfMemory("identifier index overflow entries"))
    }

    /// Walks the chain for `key`, returning its entry and raw row word.
    pub fn lookup(&self, key: u64) -> Option<(Slot, RowId)> {
        let mut slot = self.home(key);
        loop {
            if self.word(slot, KEY).load(Ordering::Acquire) == key {
                return Some((slot, RowId(self.word(slot, ROW).load(Ordering::Acquire))));
            }
            match self.word(slot, NEXT).load(Ordering::Acquire) {
                0 => return None,
                next => slot = Slot(next),
            }
        }
    }

    /// Returns the row for `key` only if it still resolves to a live object.
    pub fn find(&self, key: u64, is_live: impl Fn(RowId) -> bool) -> Option<RowId> {
        self.lookup(key)
            .map(|(_, row)| row)
            .filter(|row| !row.is_null() && is_live(*row))
    }

    /// Points the entry at `row`, returning the row it held before.
    pub fn claim(&self, slot: Slot, row: RowId) -> RowId {
        RowId(self.word(slot, ROW).swap(row.0, Ordering::AcqRel))
    }

    /// Replaces `expected` with `replacement` if the entry still holds it.
    pub fn release(&self, slot: Slot, expected: RowId, replacement: RowId) -> bool {
        self.word(slot, ROW)
            .compare_exchange(
                expected.0,
                replacement.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn row(&self, slot: Slot) -> RowId {
        RowId(self.word(slot, ROW).load(Ordering::Acquire))
    }

    /// Soft-deletes `key` if its entry still points at `row`: the entry stays
    /// linked with its row cleared.
    pub fn remove(&self, key: u64, row: RowId) -> bool {
        match self.lookup(key) {
            Some((slot, _)) => self.release(slot, row, RowId::NULL),
            None => false,
        }
    }

    /// Overflow entries handed out so far.
    pub fn overflow_used(&self) -> u64 {
        self.overflow_used.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    struct Table {
        words: Vec<AtomicU64>,
        used: AtomicU64,
        buckets: u64,
        overflow: u64,
    }

    impl Table {
        fn new(buckets: u64, overflow: u64) -> Self {
            let len = ((buckets + overflow) * INDEX_ENTRY_WORDS) as usize;
            Self {
                words: (0..len).map(|_| AtomicU64::new(0)).collect(),
                used: AtomicU64::new(0),
                buckets,
                overflow,
            }
        }

        fn index(&self) -> IdIndex<'_> {
            IdIndex::new(&self.words, self.buckets, self.overflow, &self.used)
        }
    }

    #[test]
    fn colliding_keys_chain_into_overflow() -> Result<()> {
        let table = Table::new(3, 4);
        let index = table.index();
        let a = index.insert(1, |_| true)?;
        let b = index.insert(4, |_| true)?;
        let c = index.insert(7, |_| true)?;
        assert_eq!(a, Slot(1));
        assert_eq!(b, Slot(3));
        assert_eq!(c, Slot(4));
        index.claim(a, RowId(10));
        index.claim(b, RowId(11));
        index.claim(c, RowId(12));
        assert_eq!(index.find(7, |_| true), Some(RowId(12)));
        assert_eq!(index.find(4, |_| true), Some(RowId(11)));
        assert_eq!(index.find(10, |_| true), None);
        assert_eq!(index.overflow_used(), 2);
        Ok(())
    }

    #[test]
    fn live_entry_is_duplicate_and_stale_entry_is_reused() -> Result<()> {
        let table = Table::new(5, 2);
        let index = table.index();
        let slot = index.insert(9, |_| true)?;
        index.claim(slot, RowId(3));
        assert!(matches!(
            index.insert(9, |row| row == RowId(3)),
            Err(SombraError::DuplicateId(9))
        ));
        assert_eq!(index.insert(9, |_| false)?, slot);
        assert!(!index.remove(9, RowId(4)));
        assert!(index.remove(9, RowId(3)));
        assert_eq!(index.row(slot), RowId::NULL);
        assert_eq!(index.insert(9, |_| true)?, slot);
        Ok(())
    }

    #[test]
    fn find_ignores_entries_that_are_not_live() -> Result<()> {
        let table = Table::new(5, 2);
        let index = table.index();
        let slot = index.insert(2, |_| true)?;
        index.claim(slot, RowId(1));
        assert_eq!(index.find(2, |_| false), None);
        assert_eq!(index.find(2, |_| true), Some(RowId(1)));
        Ok(())
    }

    #[test]
    fn release_only_restores_owned_entries() -> Result<()> {
        let table = Table::new(2, 2);
        let index = table.index();
        let slot = index.insert(6, |_| true)?;
        assert_eq!(index.claim(slot, RowId(4)), RowId::NULL);
        assert!(!index.release(slot, RowId(5), RowId::NULL));
        assert!(index.release(slot, RowId(4), RowId::NULL));
        assert_eq!(index.row(slot), RowId::NULL);
        Ok(())
    }

    #[test]
    fn overflow_exhaustion_is_out_of_memory() -> Result<()> {
        let table = Table::new(1, 1);
        let index = table.index();
        index.insert(1, |_| true)?;
        index.insert(2, |_| true)?;
        assert!(matches!(
            index.insert(3, |_| true),
            Err(SombraError::OutOfMemory(_))
        ));
        Ok(())
    }

    #[test]
    fn concurrent_inserts_land_in_distinct_entries() {
        let table = Arc::new(Table::new(7, 256));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let index = table.index();
                    (0..50u64)
                        .map(|i| {
                            let key = 1 + t * 50 + i;
                            let slot = index.insert(key, |_| true).unwrap();
                            index.claim(slot, RowId(key));
                            slot
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut slots: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|slot| slot.0)
            .collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), 200);
        let index = table.index();
        for key in 1..=200u64 {
            assert_eq!(index.find(key, |_| true), Some(RowId(key)));
        }
    }
}
