// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// Stale-resource reclamation: crashed peers leave a reclaimable lock file
// behind, and the next reader scrubs their kernel objects. Live buffers are
// never evicted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use zerobuffer::platform::{self, FileLock, Semaphore, SharedMemory};
use zerobuffer::{BufferConfig, Reader, Writer};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("zb_{prefix}_{}_{n}", std::process::id())
}

fn poke_u64(shm: &SharedMemory, offset: usize, value: u64) {
    unsafe { (shm.data().add(offset) as *mut u64).write(value) }
}

fn poke_u32(shm: &SharedMemory, offset: usize, value: u32) {
    unsafe { (shm.data().add(offset) as *mut u32).write(value) }
}

/// PID of a process that has already exited.
fn dead_pid() -> u64 {
    let mut child = std::process::Command::new("true")
        .spawn()
        .expect("spawn true");
    let pid = child.id() as u64;
    child.wait().expect("wait for child");
    pid
}

/// Plant the leftovers of a crashed reader: an unheld lock file, a region
/// whose OIEB names dead processes, and both semaphores.
fn plant_crashed_buffer(name: &str) {
    let lock_path = platform::temp_directory().join(format!("{name}.lock"));
    std::fs::create_dir_all(platform::temp_directory()).expect("lock dir");
    std::fs::write(&lock_path, b"").expect("plant lock file");

    let total = 128 + 1024 + 10240;
    let shm = SharedMemory::create(name, total).expect("plant region");
    poke_u32(&shm, 0, 128);
    poke_u32(&shm, 4, u32::from_le_bytes([1, 0, 0, 0]));
    poke_u64(&shm, 8, 1024);
    poke_u64(&shm, 32, 10240);
    poke_u64(&shm, 80, dead_pid()); // writer_pid
    poke_u64(&shm, 88, dead_pid()); // reader_pid

    Semaphore::create(&format!("sem-w-{name}"), 0).expect("plant data semaphore");
    Semaphore::create(&format!("sem-r-{name}"), 0).expect("plant space semaphore");
}

#[test]
fn reader_reclaims_crashed_buffer() {
    let name = unique_name("crashed");
    plant_crashed_buffer(&name);

    // Creation under the same name succeeds because the scrub reclaims the
    // lock file and removes the orphaned region and semaphores.
    let mut reader = Reader::new(&name, BufferConfig::new(1024, 10240)).expect("reclaim and create");
    let mut writer = Writer::connect(&name).expect("connect writer");

    writer.write_frame(b"alive again").expect("write");
    let frame = reader
        .read_frame(Duration::from_secs(5))
        .expect("read")
        .expect("frame");
    assert_eq!(frame.data(), b"alive again");
}

#[test]
fn scrub_removes_semaphores_without_region() {
    let name = unique_name("orphan_sems");
    let lock_path = platform::temp_directory().join(format!("{name}.lock"));
    std::fs::create_dir_all(platform::temp_directory()).expect("lock dir");
    std::fs::write(&lock_path, b"").expect("plant lock file");

    // Semaphores without a backing region: the scrub removes them anyway.
    Semaphore::create(&format!("sem-w-{name}"), 0).expect("plant data semaphore");
    Semaphore::create(&format!("sem-r-{name}"), 0).expect("plant space semaphore");

    // Creating the buffer exercises semaphore creation under the same names.
    let _reader = Reader::new(&name, BufferConfig::new(1024, 10240)).expect("create after scrub");
}

#[test]
fn live_buffer_is_never_evicted() {
    let name_a = unique_name("live_a");
    let name_b = unique_name("live_b");

    let mut reader_a = Reader::new(&name_a, BufferConfig::new(1024, 10240)).expect("reader A");
    let mut writer_a = Writer::connect(&name_a).expect("writer A");

    // A second reader's scrub runs while A is alive; A must be untouched.
    let _reader_b = Reader::new(&name_b, BufferConfig::new(1024, 10240)).expect("reader B");

    writer_a.write_frame(b"still here").expect("write through A");
    let frame = reader_a
        .read_frame(Duration::from_secs(5))
        .expect("read")
        .expect("frame");
    assert_eq!(frame.data(), b"still here");
}

#[test]
fn held_lock_is_not_stale() {
    let dir = platform::temp_directory().join("locktest");
    std::fs::create_dir_all(&dir).expect("dir");
    let path = dir.join(format!("held_{}_{}.lock", std::process::id(), COUNTER.fetch_add(1, Ordering::Relaxed)));

    let lock = FileLock::acquire(&path).expect("acquire");
    assert!(!FileLock::try_remove_stale(&path), "held lock must not be reclaimable");

    drop(lock);
    // The holder removed its file on release; nothing is left to reclaim.
    assert!(!FileLock::try_remove_stale(&path));
    assert!(!path.exists());
}

#[test]
fn unheld_lock_file_is_stale() {
    let dir = platform::temp_directory().join("locktest");
    std::fs::create_dir_all(&dir).expect("dir");
    let path = dir.join(format!("stale_{}_{}.lock", std::process::id(), COUNTER.fetch_add(1, Ordering::Relaxed)));

    std::fs::write(&path, b"").expect("plant file");
    assert!(FileLock::try_remove_stale(&path), "unheld file is reclaimable");
    assert!(!path.exists());
}

#[test]
fn concurrent_acquire_conflicts() {
    let dir = platform::temp_directory().join("locktest");
    std::fs::create_dir_all(&dir).expect("dir");
    let path = dir.join(format!("conflict_{}_{}.lock", std::process::id(), COUNTER.fetch_add(1, Ordering::Relaxed)));

    let _lock = FileLock::acquire(&path).expect("first acquire");
    let second = FileLock::acquire(&path);
    assert_eq!(
        second.err().map(|e| e.kind()),
        Some(std::io::ErrorKind::WouldBlock)
    );
}
