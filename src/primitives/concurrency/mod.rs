#![allow(unsafe_code)]
//! Commit lock shared by every process attached to a segment pair.
//!
//! The lock combines an in-process [`RwLock`] with an advisory byte-range lock
//! on the offsets segment file. Transactions take it shared while copying the
//! offset table and exclusive while validating and publishing a commit. Both
//! acquisitions are bounded by a deadline and fail with
//! [`SombraError::LockContention`] instead of blocking forever.

use std::fs::File;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{Result, SombraError};

const LOCK_BYTE: u64 = 0;
const LOCK_LEN: u64 = 1;
const MAX_BACKOFF: Duration = Duration::from_millis(10);

/// Cross-process shared/exclusive lock over the offset table.
#[derive(Clone)]
pub struct CommitLock {
    inner: Arc<Inner>,
}

struct Inner {
    file: File,
    local: RwLock<()>,
    state: Mutex<LockState>,
}

#[derive(Default, Debug)]
struct LockState {
    readers: u32,
    writer: bool,
}

/// Snapshot of lock state for observability.
#[derive(Default, Debug, Clone, Copy)]
pub struct LockSnapshot {
    /// Number of in-process shared holders.
    pub readers: u32,
    /// Whether the exclusive lock is held by this process.
    pub writer: bool,
}

/// Guard for a held shared lock.
pub struct SharedGuard<'a> {
    // Field order matters: the region lock is released before the local one.
    _region: ReaderSlot<'a>,
    _local: RwLockReadGuard<'a, ()>,
}

/// Guard for a held exclusive lock.
pub struct ExclusiveGuard<'a> {
    _region: WriterSlot<'a>,
    _local: RwLockWriteGuard<'a, ()>,
}

impl CommitLock {
    /// Builds a lock over `file`, which must be the same file every
    /// participating process locks.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(Inner {
                file,
                local: RwLock::new(()),
                state: Mutex::new(LockState::default()),
            }),
        }
    }

    /// Acquires the lock shared, waiting at most `timeout`.
    pub fn acquire_shared(&self, timeout: Duration) -> Result<SharedGuard<'_>> {
        let started = Instant::now();
        let deadline = started + timeout;
        let local = self
            .inner
            .local
            .try_read_until(deadline)
            .ok_or_else(|| contention(started))?;
        let mut state = self
            .inner
            .state
            .try_lock_until(deadline)
            .ok_or_else(|| contention(started))?;
        if state.readers == 0 {
            lock_until(&self.inner.file, false, started, deadline)?;
        }
        state.readers = state.readers.saturating_add(1);
        drop(state);
        Ok(SharedGuard {
            _region: ReaderSlot { inner: &self.inner },
            _local: local,
        })
    }

    /// Acquires the lock exclusively, waiting at most `timeout`.
    pub fn acquire_exclusive(&self, timeout: Duration) -> Result<ExclusiveGuard<'_>> {
        let started = Instant::now();
        let deadline = started + timeout;
        let local = self
            .inner
            .local
            .try_write_until(deadline)
            .ok_or_else(|| contention(started))?;
        lock_until(&self.inner.file, true, started, deadline)?;
        self.inner.state.lock().writer = true;
        Ok(ExclusiveGuard {
            _region: WriterSlot { inner: &self.inner },
            _local: local,
        })
    }

    /// Returns a snapshot of the in-process lock state.
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.inner.state.lock();
        LockSnapshot {
            readers: state.readers,
            writer: state.writer,
        }
    }
}

struct ReaderSlot<'a> {
    inner: &'a Inner,
}

impl Drop for ReaderSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            release(&self.inner.file);
        }
    }
}

struct WriterSlot<'a> {
    inner: &'a Inner,
}

impl Drop for WriterSlot<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().writer = false;
        release(&self.inner.file);
    }
}

fn contention(started: Instant) -> SombraError {
    SombraError::LockContention {
        waited_ms: started.elapsed().as_millis() as u64,
    }
}

fn lock_until(file: &File, exclusive: bool, started: Instant, deadline: Instant) -> Result<()> {
    let mut backoff = Duration::from_micros(200);
    loop {
        let acquired = lock_region(file, LOCK_BYTE, LOCK_LEN, exclusive)
            .map_err(|err| SombraError::Unavailable(format!("commit lock: {err}")))?;
        if acquired {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(contention(started));
        }
        std::thread::sleep(backoff.min(deadline - now));
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

fn release(file: &File) {
    if let Err(_err) = unlock_region(file, LOCK_BYTE, LOCK_LEN) {
        #[cfg(debug_assertions)]
        eprintln!("failed to unlock commit lock: {_err:?}");
    }
}

fn lock_region(file: &File, start: u64, len: u64, exclusive: bool) -> io::Result<bool> {
    #[cfg(unix)]
    {
        unix::lock_region(file, start, len, exclusive)
    }
    #[cfg(not(unix))]
    {
        let _ = (file, start, len, exclusive);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file locking unsupported on this platform",
        ))
    }
}

fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        unix::unlock_region(file, start, len)
    }
    #[cfg(not(unix))]
    {
        let _ = (file, start, len);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file locking unsupported on this platform",
        ))
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::io::AsRawFd;

    // Open-file-description locks belong to the open file rather than the
    // process, so two engines in one process exclude each other and closing an
    // unrelated descriptor does not drop the lock.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    const SET_LOCK: libc::c_int = libc::F_OFD_SETLK;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const SET_LOCK: libc::c_int = libc::F_SETLK;

    fn flock_for(l_type: libc::c_int, start: u64, len: u64) -> libc::flock {
        // SAFETY: `flock` is a plain C struct for which all-zero is valid.
        let mut flock: libc::flock = unsafe { std::mem::zeroed() };
        flock.l_type = l_type as _;
        flock.l_whence = libc::SEEK_SET as _;
        flock.l_start = start as libc::off_t;
        flock.l_len = len as libc::off_t;
        flock.l_pid = 0;
        flock
    }

    pub fn lock_region(file: &File, start: u64, len: u64, exclusive: bool) -> io::Result<bool> {
        let fd = file.as_raw_fd();
        let l_type = if exclusive {
            libc::F_WRLCK
        } else {
            libc::F_RDLCK
        };
        let mut flock = flock_for(l_type as libc::c_int, start, len);
        loop {
            let res = unsafe { libc::fcntl(fd, SET_LOCK, &mut flock) };
            if res == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) | Some(libc::EACCES) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    pub fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let mut flock = flock_for(libc::F_UNLCK as libc::c_int, start, len);
        let res = unsafe { libc::fcntl(fd, SET_LOCK, &mut flock) };
        if res == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::path::Path;
    use std::thread;
    use tempfile::tempdir;

    fn open_lock(path: &Path) -> CommitLock {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .unwrap();
        CommitLock::new(file)
    }

    #[test]
    fn shared_locks_stack() -> Result<()> {
        let dir = tempdir().unwrap();
        let lock = open_lock(&dir.path().join("stack.lock"));
        let a = lock.acquire_shared(Duration::from_millis(100))?;
        let b = lock.acquire_shared(Duration::from_millis(100))?;
        assert_eq!(lock.snapshot().readers, 2);
        drop(a);
        drop(b);
        assert_eq!(lock.snapshot().readers, 0);
        Ok(())
    }

    #[test]
    fn exclusive_times_out_while_held() -> Result<()> {
        let dir = tempdir().unwrap();
        let lock = open_lock(&dir.path().join("timeout.lock"));
        let guard = lock.acquire_exclusive(Duration::from_millis(100))?;
        assert!(lock.snapshot().writer);
        let other = lock.clone();
        let handle = thread::spawn(move || {
            other
                .acquire_exclusive(Duration::from_millis(30))
                .map(|_| ())
        });
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(SombraError::LockContention { .. })));
        drop(guard);
        assert!(!lock.snapshot().writer);
        lock.acquire_exclusive(Duration::from_millis(100)).map(|_| ())
    }

    #[test]
    fn shared_waits_for_exclusive_release() -> Result<()> {
        let dir = tempdir().unwrap();
        let lock = open_lock(&dir.path().join("release.lock"));
        let guard = lock.acquire_exclusive(Duration::from_millis(100))?;
        let other = lock.clone();
        let handle = thread::spawn(move || {
            other
                .acquire_shared(Duration::from_secs(5))
                .map(|_| ())
        });
        thread::sleep(Duration::from_millis(50));
        drop(guard);
        handle.join().unwrap()
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn separate_opens_exclude_each_other() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ofd.lock");
        let first = open_lock(&path);
        let second = open_lock(&path);
        let guard = first.acquire_exclusive(Duration::from_millis(100))?;
        assert!(matches!(
            second.acquire_shared(Duration::from_millis(30)),
            Err(SombraError::LockContention { .. })
        ));
        drop(guard);
        second.acquire_shared(Duration::from_millis(100)).map(|_| ())
    }
}
