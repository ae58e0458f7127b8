// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// POSIX implementation: shm_open/mmap shared memory, sem_open counting
// semaphores, flock advisory file locks, kill(pid, 0) liveness and
// /proc-based process start times.

use std::ffi::CString;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr;
use std::time::Duration;

/// POSIX shm and semaphore names carry a leading '/'.
fn make_posix_name(name: &str) -> io::Result<CString> {
    let full = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    CString::new(full).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// Shared memory is created world read/write to allow cross-user scenarios.
const SHARED_PERMS: libc::mode_t = 0o666;

// ---------------------------------------------------------------------------
// PlatformShm
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
}

// The mapping is shared between processes by design; synchronisation is the
// caller's protocol (semaphores + fences).
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let c_name = make_posix_name(name)?;

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                SHARED_PERMS as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // shm_open applies the umask; force the intended permissions.
        unsafe { libc::fchmod(fd, SHARED_PERMS) };

        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(err);
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(err);
        }

        // A new segment must start zeroed.
        unsafe { ptr::write_bytes(mem as *mut u8, 0, size) };

        Ok(Self {
            mem: mem as *mut u8,
            size,
        })
    }

    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = make_posix_name(name)?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let size = st.st_size as usize;

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *mut u8,
            size,
        })
    }

    pub fn data(&self) -> *mut u8 {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remove(name: &str) {
        if let Ok(c_name) = make_posix_name(name) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformSemaphore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PlatformSemaphore {
    sem: *mut libc::sem_t,
}

unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        let c_name = make_posix_name(name)?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                SHARED_PERMS as libc::c_uint,
                initial,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem })
    }

    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = make_posix_name(name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem })
    }

    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        match timeout {
            None => loop {
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINTR) {
                    return Err(err);
                }
            },
            Some(d) => self.timed_wait(d),
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn timed_wait(&self, timeout: Duration) -> io::Result<bool> {
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
        let nsec_total = ts.tv_nsec as u64 + timeout.subsec_nanos() as u64;
        ts.tv_sec += timeout.as_secs() as libc::time_t + (nsec_total / 1_000_000_000) as libc::time_t;
        ts.tv_nsec = (nsec_total % 1_000_000_000) as libc::c_long;

        loop {
            if unsafe { libc::sem_timedwait(self.sem, &ts) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    // macOS lacks sem_timedwait; emulate with try_wait polling.
    #[cfg(target_os = "macos")]
    fn timed_wait(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => return Err(err),
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn signal(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn remove(name: &str) {
        if let Ok(c_name) = make_posix_name(name) {
            unsafe { libc::sem_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        if self.sem != libc::SEM_FAILED {
            unsafe { libc::sem_close(self.sem) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformFileLock
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PlatformFileLock {
    fd: libc::c_int,
    path: PathBuf,
}

impl PlatformFileLock {
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let c_path = path_to_cstring(path)?;
        let fd = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                SHARED_PERMS as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Ok(Self {
            fd,
            path: path.to_path_buf(),
        })
    }

    pub fn try_remove_stale(path: &Path) -> bool {
        let Ok(c_path) = path_to_cstring(path) else {
            return false;
        };
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
        if fd == -1 {
            // Missing file: nothing to reclaim.
            return false;
        }

        if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } == 0 {
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
                libc::close(fd);
            }
            return unsafe { libc::unlink(c_path.as_ptr()) } == 0;
        }

        unsafe { libc::close(fd) };
        false
    }
}

impl Drop for PlatformFileLock {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
        if let Ok(c_path) = path_to_cstring(&self.path) {
            unsafe { libc::unlink(c_path.as_ptr()) };
        }
    }
}

fn path_to_cstring(path: &Path) -> io::Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// ---------------------------------------------------------------------------
// Process queries
// ---------------------------------------------------------------------------

pub fn current_pid() -> u64 {
    unsafe { libc::getpid() as u64 }
}

pub fn process_exists(pid: u64) -> bool {
    if pid == 0 {
        return false;
    }
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    // EPERM means the process exists but is not ours.
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

/// Start time in clock ticks since boot, field 22 of /proc/<pid>/stat.
#[cfg(target_os = "linux")]
pub fn process_start_time(pid: u64) -> Option<u64> {
    if pid == 0 {
        return None;
    }
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The command field is parenthesised and may contain spaces; fields
    // resume at 3 after the closing parenthesis.
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(19)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
pub fn process_start_time(_pid: u64) -> Option<u64> {
    None
}

pub fn temp_directory() -> PathBuf {
    PathBuf::from("/tmp/zerobuffer")
}
