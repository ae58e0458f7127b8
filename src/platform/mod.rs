// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// OS primitives behind the transport: named shared memory, named counting
// semaphores, advisory file locks, process queries and the lock-file
// directory. Delegates to the POSIX or Windows implementation.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use posix as imp;
#[cfg(windows)]
use windows as imp;

// ---------------------------------------------------------------------------
// SharedMemory
// ---------------------------------------------------------------------------

/// A named, inter-process shared memory region.
///
/// Created exclusively by the reader (zero-filled), opened by the writer.
/// Dropping a handle unmaps the region but never removes the named object;
/// removal is an explicit, by-name operation owned by the reader.
#[derive(Debug)]
pub struct SharedMemory {
    inner: imp::PlatformShm,
}

impl SharedMemory {
    /// Create a region of `size` bytes. Fails with
    /// [`io::ErrorKind::AlreadyExists`] if the name is taken, so the caller
    /// can distinguish a collision from other failures and run the
    /// stale-resource scrub.
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        Ok(Self {
            inner: imp::PlatformShm::create(name, size)?,
        })
    }

    /// Open an existing region by name; the size is discovered from the OS.
    pub fn open(name: &str) -> io::Result<Self> {
        Ok(Self {
            inner: imp::PlatformShm::open(name)?,
        })
    }

    /// Base pointer of the mapping.
    pub fn data(&self) -> *mut u8 {
        self.inner.data()
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Remove the named object. Missing objects are not an error.
    pub fn remove(name: &str) {
        imp::PlatformShm::remove(name);
    }
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

/// A named, inter-process counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    inner: imp::PlatformSemaphore,
}

impl Semaphore {
    /// Create a semaphore with `initial` permits. Fails if the name exists.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        Ok(Self {
            inner: imp::PlatformSemaphore::create(name, initial)?,
        })
    }

    /// Open an existing semaphore by name.
    pub fn open(name: &str) -> io::Result<Self> {
        Ok(Self {
            inner: imp::PlatformSemaphore::open(name)?,
        })
    }

    /// Wait for a permit. `None` blocks indefinitely. Returns `Ok(false)` on
    /// timeout. Interrupted waits are retried.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        self.inner.wait(timeout)
    }

    /// Release one permit.
    pub fn signal(&self) -> io::Result<()> {
        self.inner.signal()
    }

    /// Remove the named object. Missing objects are not an error.
    pub fn remove(name: &str) {
        imp::PlatformSemaphore::remove(name);
    }
}

// ---------------------------------------------------------------------------
// FileLock
// ---------------------------------------------------------------------------

/// An exclusive advisory lock on a file, held for the lifetime of the
/// handle. Dropping the handle releases the lock and removes the file.
#[derive(Debug)]
pub struct FileLock {
    inner: imp::PlatformFileLock,
}

impl FileLock {
    /// Acquire an exclusive non-blocking lock, creating the file (and its
    /// parent directory) if needed. A held lock surfaces as
    /// [`io::ErrorKind::WouldBlock`].
    pub fn acquire(path: &Path) -> io::Result<Self> {
        Ok(Self {
            inner: imp::PlatformFileLock::acquire(path)?,
        })
    }

    /// Returns true iff an existing lock file could be exclusively re-locked
    /// (no live holder) and was then unlinked. A missing file returns false.
    pub fn try_remove_stale(path: &Path) -> bool {
        imp::PlatformFileLock::try_remove_stale(path)
    }
}

// ---------------------------------------------------------------------------
// Process queries
// ---------------------------------------------------------------------------

/// PID of the calling process.
pub fn current_pid() -> u64 {
    imp::current_pid()
}

/// Whether a process with `pid` currently exists. PID 0 never exists.
pub fn process_exists(pid: u64) -> bool {
    imp::process_exists(pid)
}

/// Best-effort start time of `pid` in platform-specific ticks, used to
/// disambiguate PID reuse. `None` if the process is gone or the query is
/// unsupported.
pub fn process_start_time(pid: u64) -> Option<u64> {
    imp::process_start_time(pid)
}

/// Start time of the calling process. See [`process_start_time`].
pub fn current_process_start_time() -> Option<u64> {
    process_start_time(current_pid())
}

/// The per-user directory where buffer lock files live.
pub fn temp_directory() -> PathBuf {
    imp::temp_directory()
}

/// Round `x` up to the next multiple of `align` (a power of two).
pub const fn align_up(x: usize, align: usize) -> usize {
    (x + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_boundaries() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(1000, 8), 1000);
        assert_eq!(align_up(1001, 8), 1008);
    }

    #[test]
    fn current_process_queries() {
        let pid = current_pid();
        assert!(pid > 0);
        assert!(process_exists(pid));
        assert!(!process_exists(0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn start_time_of_live_process() {
        assert!(current_process_start_time().is_some());
        // A PID that cannot exist has no start time
        assert_eq!(process_start_time(u32::MAX as u64 + 7), None);
    }

    #[test]
    fn temp_directory_is_stable() {
        let a = temp_directory();
        let b = temp_directory();
        assert_eq!(a, b);
        assert!(a.ends_with("zerobuffer"));
    }
}
