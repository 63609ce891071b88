#![allow(unsafe_code)]
//! Named shared-memory segments viewed as arrays of atomic words.
//!
//! A segment is a file inside a shared-memory directory (`/dev/shm` on Linux)
//! mapped `MAP_SHARED`, so every process that maps the same name observes the
//! same words. All access goes through [`AtomicU64`] so concurrent writers in
//! other processes never race with plain loads.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;

use memmap2::{MmapMut, MmapOptions};

use crate::types::{Result, SombraError};

const WORD: u64 = std::mem::size_of::<u64>() as u64;

/// A mapped shared segment.
pub struct SharedSegment {
    path: PathBuf,
    file: File,
    map: MmapMut,
    words: usize,
}

impl SharedSegment {
    /// Creates (or truncates) the segment and sizes it to `words` zeroed words.
    pub fn create(path: impl AsRef<Path>, words: u64) -> Result<Self> {
        let path = path.as_ref();
        if words == 0 {
            return Err(SombraError::Invalid("segment must hold at least one word"));
        }
        let bytes = words
            .checked_mul(WORD)
            .ok_or(SombraError::Invalid("segment size overflows"))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| unavailable("open", path, err))?;
        file.set_len(0)
            .and_then(|_| file.set_len(bytes))
            .map_err(|err| unavailable("size", path, err))?;
        Self::map(path, file)
    }

    /// Opens an existing segment created by another engine.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| unavailable("open", path, err))?;
        Self::map(path, file)
    }

    fn map(path: &Path, file: File) -> Result<Self> {
        let len = file
            .metadata()
            .map_err(|err| unavailable("stat", path, err))?
            .len();
        if len == 0 || len % WORD != 0 {
            return Err(SombraError::Unavailable(format!(
                "segment {} has invalid length {len}",
                path.display()
            )));
        }
        let words = usize::try_from(len / WORD)
            .map_err(|_| SombraError::Unavailable("segment too large to map".into()))?;
        // SAFETY: the file stays open for the lifetime of the mapping, and all
        // reads and writes through it use atomics, so concurrent modification by
        // other processes is not a data race.
        let map = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|err| unavailable("mmap", path, err))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
            words,
        })
    }

    /// All words of the segment.
    pub fn words(&self) -> &[AtomicU64] {
        // SAFETY: mappings are page aligned, `AtomicU64` has the layout of
        // `u64`, the length was checked to be a whole number of words, and the
        // slice borrows `self` so it cannot outlive the mapping.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr() as *const AtomicU64, self.words) }
    }

    /// Bounds-checked sub-range of words.
    pub fn range(&self, start: usize, len: usize) -> Result<&[AtomicU64]> {
        let end = start
            .checked_add(len)
            .ok_or(SombraError::Corruption("segment range overflow"))?;
        self.words()
            .get(start..end)
            .ok_or(SombraError::Corruption("segment range out of bounds"))
    }

    /// Number of words in the segment.
    pub fn len_words(&self) -> usize {
        self.words
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backing file, used for advisory locking.
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("path", &self.path)
            .field("words", &self.words)
            .finish()
    }
}

fn unavailable(op: &str, path: &Path, err: std::io::Error) -> SombraError {
    SombraError::Unavailable(format!("{op} {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    #[test]
    fn two_mappings_share_words() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        let a = SharedSegment::create(&path, 16)?;
        let b = SharedSegment::open(&path)?;
        a.words()[3].store(77, Ordering::SeqCst);
        assert_eq!(b.words()[3].load(Ordering::SeqCst), 77);
        assert_eq!(b.len_words(), 16);
        Ok(())
    }

    #[test]
    fn create_truncates_existing_contents() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg");
        {
            let seg = SharedSegment::create(&path, 8)?;
            seg.words()[0].store(9, Ordering::SeqCst);
        }
        let seg = SharedSegment::create(&path, 8)?;
        assert_eq!(seg.words()[0].load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn range_is_bounds_checked() -> Result<()> {
        let dir = tempdir().unwrap();
        let seg = SharedSegment::create(dir.path().join("seg"), 4)?;
        assert_eq!(seg.range(1, 3)?.len(), 3);
        assert!(matches!(
            seg.range(2, 3),
            Err(SombraError::Corruption(_))
        ));
        Ok(())
    }

    #[test]
    fn oversized_segment_is_rejected_before_touching_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge");
        assert!(matches!(
            SharedSegment::create(&path, u64::MAX / 4),
            Err(SombraError::Invalid(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn open_missing_segment_is_unavailable() {
        let dir = tempdir().unwrap();
        let err = SharedSegment::open(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, SombraError::Unavailable(_)));
    }
}
