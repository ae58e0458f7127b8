// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// Windows implementation: pagefile-backed file mappings in the Global\
// namespace, named semaphores, share-nothing lock files with
// delete-on-close, and OpenProcess-based liveness queries.

use std::io;
use std::path::{Path, PathBuf};
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, ERROR_SHARING_VIOLATION, FILETIME,
    GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE, STILL_ACTIVE,
};

/// Encode a name as a null-terminated wide string for Win32 APIs.
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn path_to_wide(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Kernel objects live in the cross-session Global\ namespace.
fn global_name(name: &str) -> Vec<u16> {
    to_wide(&format!("Global\\{name}"))
}

// ---------------------------------------------------------------------------
// PlatformShm
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PlatformShm {
    handle: HANDLE,
    mem: *mut u8,
    size: usize,
}

unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        use windows_sys::Win32::System::Memory::{
            CreateFileMappingW, MapViewOfFile, FILE_MAP_ALL_ACCESS, PAGE_READWRITE,
        };

        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        let wide = global_name(name);

        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE,
                (size as u64 >> 32) as u32,
                size as u32,
                wide.as_ptr(),
            )
        };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(handle) };
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "shared memory already exists",
            ));
        }

        let mem = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        if mem.is_null() {
            let err = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(err);
        }

        // A new mapping must start zeroed (the pagefile backing already is,
        // but the contract is explicit).
        unsafe { ptr::write_bytes(mem as *mut u8, 0, size) };

        Ok(Self {
            handle,
            mem: mem as *mut u8,
            size,
        })
    }

    pub fn open(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::System::Memory::{
            MapViewOfFile, OpenFileMappingW, VirtualQuery, FILE_MAP_ALL_ACCESS,
            MEMORY_BASIC_INFORMATION,
        };

        let wide = global_name(name);
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wide.as_ptr()) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }

        let mem = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        if mem.is_null() {
            let err = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(err);
        }

        let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            VirtualQuery(
                mem as *const _,
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if ret == 0 {
            let err = io::Error::last_os_error();
            unsafe {
                windows_sys::Win32::System::Memory::UnmapViewOfFile(mem);
                CloseHandle(handle);
            }
            return Err(err);
        }

        Ok(Self {
            handle,
            mem: mem as *mut u8,
            size: info.RegionSize,
        })
    }

    pub fn data(&self) -> *mut u8 {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remove(_name: &str) {
        // Mappings vanish when the last handle closes; nothing to unlink.
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        use windows_sys::Win32::System::Memory::UnmapViewOfFile;

        if !self.mem.is_null() {
            unsafe { UnmapViewOfFile(self.mem as *const _) };
        }
        if self.handle != 0 {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformSemaphore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PlatformSemaphore {
    handle: HANDLE,
}

unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        use windows_sys::Win32::System::Threading::CreateSemaphoreW;

        let wide = global_name(name);
        let handle =
            unsafe { CreateSemaphoreW(ptr::null(), initial as i32, i32::MAX, wide.as_ptr()) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(handle) };
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "semaphore already exists",
            ));
        }
        Ok(Self { handle })
    }

    pub fn open(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::System::Threading::{
            OpenSemaphoreW, SEMAPHORE_MODIFY_STATE, SYNCHRONIZATION_SYNCHRONIZE,
        };

        let wide = global_name(name);
        let handle = unsafe {
            OpenSemaphoreW(
                SEMAPHORE_MODIFY_STATE | SYNCHRONIZATION_SYNCHRONIZE,
                0,
                wide.as_ptr(),
            )
        };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        #[allow(unused_imports)]
        use windows_sys::Win32::Foundation::*;
        use windows_sys::Win32::System::Threading::*;

        let ms = match timeout {
            None => INFINITE,
            Some(d) => d.as_millis().min(u128::from(INFINITE - 1)) as u32,
        };
        match unsafe { WaitForSingleObject(self.handle, ms) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn signal(&self) -> io::Result<()> {
        use windows_sys::Win32::System::Threading::ReleaseSemaphore;

        if unsafe { ReleaseSemaphore(self.handle, 1, ptr::null_mut()) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn remove(_name: &str) {
        // Named semaphores vanish when the last handle closes.
    }
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        if self.handle != 0 {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformFileLock
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PlatformFileLock {
    handle: HANDLE,
}

impl PlatformFileLock {
    pub fn acquire(path: &Path) -> io::Result<Self> {
        use windows_sys::Win32::Storage::FileSystem::{
            CreateFileW, CREATE_ALWAYS, FILE_ATTRIBUTE_NORMAL, FILE_FLAG_DELETE_ON_CLOSE,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let wide = path_to_wide(path);
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0, // no sharing: the open handle IS the lock
                ptr::null(),
                CREATE_ALWAYS,
                FILE_ATTRIBUTE_NORMAL | FILE_FLAG_DELETE_ON_CLOSE,
                0,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            let err = unsafe { GetLastError() };
            if err == ERROR_SHARING_VIOLATION {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "lock file is held by another process",
                ));
            }
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    pub fn try_remove_stale(path: &Path) -> bool {
        use windows_sys::Win32::Storage::FileSystem::{
            CreateFileW, DeleteFileW, FILE_ATTRIBUTE_NORMAL, OPEN_EXISTING,
        };

        let wide = path_to_wide(path);
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                0,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            // Held (sharing violation) or already gone: nothing reclaimed.
            return false;
        }
        unsafe { CloseHandle(handle) };
        unsafe { DeleteFileW(wide.as_ptr()) != 0 }
    }
}

impl Drop for PlatformFileLock {
    fn drop(&mut self) {
        // FILE_FLAG_DELETE_ON_CLOSE removes the file with the handle.
        if self.handle != INVALID_HANDLE_VALUE {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

// ---------------------------------------------------------------------------
// Process queries
// ---------------------------------------------------------------------------

pub fn current_pid() -> u64 {
    use windows_sys::Win32::System::Threading::GetCurrentProcessId;
    unsafe { GetCurrentProcessId() as u64 }
}

pub fn process_exists(pid: u64) -> bool {
    use windows_sys::Win32::Foundation::ERROR_ACCESS_DENIED;
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    if pid == 0 {
        return false;
    }
    let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid as u32) };
    if handle == 0 {
        // Access denied still means the process exists.
        return unsafe { GetLastError() } == ERROR_ACCESS_DENIED;
    }
    let mut code: u32 = 0;
    let alive =
        unsafe { GetExitCodeProcess(handle, &mut code) } != 0 && code == STILL_ACTIVE as u32;
    unsafe { CloseHandle(handle) };
    alive
}

/// Creation time as a 100ns-tick FILETIME value.
pub fn process_start_time(pid: u64) -> Option<u64> {
    use windows_sys::Win32::System::Threading::{
        GetProcessTimes, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    if pid == 0 {
        return None;
    }
    let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid as u32) };
    if handle == 0 {
        return None;
    }
    let mut creation: FILETIME = unsafe { std::mem::zeroed() };
    let mut exit: FILETIME = unsafe { std::mem::zeroed() };
    let mut kernel: FILETIME = unsafe { std::mem::zeroed() };
    let mut user: FILETIME = unsafe { std::mem::zeroed() };
    let ok = unsafe { GetProcessTimes(handle, &mut creation, &mut exit, &mut kernel, &mut user) };
    unsafe { CloseHandle(handle) };
    if ok == 0 {
        return None;
    }
    Some(((creation.dwHighDateTime as u64) << 32) | creation.dwLowDateTime as u64)
}

pub fn temp_directory() -> PathBuf {
    std::env::temp_dir().join("zerobuffer")
}
