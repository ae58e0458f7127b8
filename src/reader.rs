// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// Reader side of a buffer. The reader owns the lifecycle of the named
// objects: it creates the region and both semaphores, scrubs stale resources
// left by crashed peers, and removes everything on drop. Frames are handed
// out as scoped borrows; dropping a frame credits the ring and wakes the
// writer.

use std::io;
use std::path::Path;
use std::sync::atomic::{fence, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, ZeroBufferError};
use crate::names;
use crate::platform::{self, align_up, FileLock, Semaphore, SharedMemory};
use crate::types::{
    BufferConfig, Frame, FrameHeader, Oieb, ReleaseToken, BLOCK_ALIGNMENT, FRAME_HEADER_SIZE,
};

/// Poll interval for [`Reader::is_writer_connected_timeout`].
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owns a named buffer and delivers frames in FIFO order with back-pressure.
///
/// Exactly one reader may own a buffer at a time; ownership is guarded by an
/// advisory lock file. Dropping the reader destroys the buffer.
#[derive(Debug)]
pub struct Reader {
    name: String,
    shm: SharedMemory,
    sem_data: Semaphore,
    sem_space: Semaphore,
    metadata_offset: usize,
    payload_offset: usize,
    payload_size: u64,
    expected_sequence: u64,
    frames_read: u64,
    bytes_read: u64,
    // Held for the lifetime of the reader; released and unlinked on drop.
    _lock: FileLock,
}

impl Reader {
    /// Create the named buffer and prepare for reading.
    ///
    /// Runs the stale-resource scrub first, then acquires the buffer's lock
    /// file (`BufferAlreadyInUse` if another reader holds it), creates the
    /// region and both semaphores and initialises the OIEB.
    pub fn new(name: &str, config: BufferConfig) -> Result<Self> {
        let lock_dir = platform::temp_directory();
        scrub_stale_resources(&lock_dir);

        let lock = FileLock::acquire(&names::lock_file_path(name)).map_err(|e| {
            if e.kind() == io::ErrorKind::WouldBlock {
                ZeroBufferError::BufferAlreadyInUse(name.to_string())
            } else {
                ZeroBufferError::Io(e)
            }
        })?;

        let metadata_size = align_up(config.metadata_size, BLOCK_ALIGNMENT);
        let payload_size = align_up(config.payload_size, BLOCK_ALIGNMENT);
        let total = std::mem::size_of::<Oieb>() + metadata_size + payload_size;

        debug!(
            "creating buffer '{}' (metadata={}, payload={}, total={})",
            name, metadata_size, payload_size, total
        );

        let shm = match SharedMemory::create(name, total) {
            Ok(shm) => shm,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Leftovers from a crashed owner whose lock we now hold.
                warn!("buffer '{}' already exists, removing and retrying", name);
                SharedMemory::remove(name);
                Semaphore::remove(&names::data_sem_name(name));
                Semaphore::remove(&names::space_sem_name(name));
                SharedMemory::create(name, total)?
            }
            Err(e) => return Err(e.into()),
        };

        let oieb = unsafe { &*(shm.data() as *const Oieb) };
        oieb.init(
            metadata_size as u64,
            payload_size as u64,
            platform::current_pid(),
        );

        let sem_data = create_semaphore_fresh(&names::data_sem_name(name))?;
        let sem_space = create_semaphore_fresh(&names::space_sem_name(name))?;

        Ok(Self {
            name: name.to_string(),
            shm,
            sem_data,
            sem_space,
            metadata_offset: std::mem::size_of::<Oieb>(),
            payload_offset: std::mem::size_of::<Oieb>() + metadata_size,
            payload_size: payload_size as u64,
            expected_sequence: 1,
            frames_read: 0,
            bytes_read: 0,
            _lock: lock,
        })
    }

    fn oieb(&self) -> &Oieb {
        unsafe { &*(self.shm.data() as *const Oieb) }
    }

    /// Frame headers land at arbitrary ring offsets, hence the unaligned read.
    fn header_at(&self, pos: u64) -> FrameHeader {
        unsafe {
            std::ptr::read_unaligned(
                self.shm.data().add(self.payload_offset + pos as usize) as *const FrameHeader
            )
        }
    }

    /// The buffer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for and read the next frame.
    ///
    /// Returns `Ok(None)` when `timeout` elapses with a live writer. Fails
    /// with [`ZeroBufferError::WriterDead`] when the writer process is gone,
    /// and [`ZeroBufferError::SequenceError`] on an out-of-order frame.
    ///
    /// The returned [`Frame`] borrows this reader; dropping it releases the
    /// underlying ring bytes and signals the writer.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame<'_>>> {
        let start = Instant::now();

        loop {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(None);
            }

            if !self.sem_data.wait(Some(timeout - elapsed))? {
                let writer_pid = self.oieb().writer_pid.load(Ordering::Relaxed);
                if writer_pid != 0 && !platform::process_exists(writer_pid) {
                    return Err(ZeroBufferError::WriterDead);
                }
                return Ok(None);
            }

            fence(Ordering::Acquire);

            {
                let oieb = self.oieb();
                // A gracefully departed writer leaves writer_pid == 0; once
                // everything it committed has been consumed there is nothing
                // left to wait for.
                if oieb.writer_pid.load(Ordering::Relaxed) == 0
                    && oieb.payload_written_count.load(Ordering::Relaxed)
                        <= oieb.payload_read_count.load(Ordering::Relaxed)
                {
                    return Err(ZeroBufferError::WriterDead);
                }
            }

            let n = self.payload_size;
            let mut read_pos = self.oieb().payload_read_pos.load(Ordering::Relaxed);

            if n - read_pos < FRAME_HEADER_SIZE as u64 {
                // The writer wrapped without room for a marker; skip the tail.
                let wasted = n - read_pos;
                let oieb = self.oieb();
                oieb.payload_free_bytes.fetch_add(wasted, Ordering::AcqRel);
                oieb.payload_read_pos.store(0, Ordering::Relaxed);
                read_pos = 0;
            } else if self.header_at(read_pos).payload_size == 0 {
                // Wrap marker: credit the wasted tail and continue at offset
                // 0 without waiting again; the marker shares the signal of
                // the frame that follows it.
                let wasted = n - read_pos;
                debug!(
                    "wrap marker at {} in '{}', crediting {} tail bytes",
                    read_pos, self.name, wasted
                );
                let oieb = self.oieb();
                oieb.payload_free_bytes.fetch_add(wasted, Ordering::AcqRel);
                oieb.payload_read_pos.store(0, Ordering::Relaxed);
                oieb.payload_read_count.fetch_add(1, Ordering::Relaxed);
                read_pos = 0;
            }

            let mut header = self.header_at(read_pos);
            self.validate_header(&header)?;
            let mut total = FRAME_HEADER_SIZE as u64 + header.payload_size;

            if read_pos + total > n {
                // A frame never straddles the end of the ring. Reaching this
                // point means the writer wrapped without a marker surviving;
                // follow it if its position confirms the wrap.
                if self.oieb().payload_write_pos.load(Ordering::Relaxed) < read_pos {
                    let wasted = n - read_pos;
                    let oieb = self.oieb();
                    oieb.payload_free_bytes.fetch_add(wasted, Ordering::AcqRel);
                    oieb.payload_read_pos.store(0, Ordering::Relaxed);
                    read_pos = 0;
                    header = self.header_at(0);
                    self.validate_header(&header)?;
                    total = FRAME_HEADER_SIZE as u64 + header.payload_size;
                } else {
                    // Writer has not wrapped yet; wait for more data.
                    continue;
                }
            }

            let oieb = self.oieb();
            let mut new_pos = read_pos + total;
            if new_pos >= n {
                new_pos -= n;
            }
            oieb.payload_read_pos.store(new_pos, Ordering::Relaxed);
            oieb.payload_read_count.fetch_add(1, Ordering::Relaxed);

            let sequence = header.sequence_number;
            let len = header.payload_size as usize;
            let data_offset = self.payload_offset + read_pos as usize + FRAME_HEADER_SIZE;

            self.expected_sequence += 1;
            self.frames_read += 1;
            self.bytes_read += len as u64;

            // Free-byte credit and the space-available signal are deferred to
            // the frame's release token.
            let data = unsafe { std::slice::from_raw_parts(self.shm.data().add(data_offset), len) };
            let token = ReleaseToken::new(self.oieb(), &self.sem_space, total);
            return Ok(Some(Frame::new(data, sequence, token)));
        }
    }

    fn validate_header(&self, header: &FrameHeader) -> Result<()> {
        if header.sequence_number != self.expected_sequence {
            return Err(ZeroBufferError::SequenceError {
                expected: self.expected_sequence,
                got: header.sequence_number,
            });
        }
        if header.payload_size == 0 {
            return Err(ZeroBufferError::InvalidFrameSize);
        }
        if header.payload_size + FRAME_HEADER_SIZE as u64 > self.payload_size {
            return Err(ZeroBufferError::FrameTooLarge {
                size: header.payload_size as usize,
                capacity: self.payload_size - FRAME_HEADER_SIZE as u64,
            });
        }
        Ok(())
    }

    /// The one-shot metadata, or `None` if the writer has not set any.
    /// Zero-copy: the slice points into the shared region.
    pub fn metadata(&self) -> Result<Option<&[u8]>> {
        let written = self.oieb().metadata_written_bytes.load(Ordering::Acquire);
        if written == 0 {
            return Ok(None);
        }
        let meta_ptr = unsafe { self.shm.data().add(self.metadata_offset) };
        // The metadata block is 64-byte aligned, so the prefix read is aligned.
        let len = unsafe { (meta_ptr as *const u64).read() };
        if len == 0 || len > written - 8 {
            return Err(ZeroBufferError::InvalidMetadata);
        }
        Ok(Some(unsafe {
            std::slice::from_raw_parts(meta_ptr.add(8), len as usize)
        }))
    }

    /// Length of the written metadata payload, 0 if none.
    pub fn metadata_size(&self) -> usize {
        if self.oieb().metadata_written_bytes.load(Ordering::Acquire) == 0 {
            return 0;
        }
        let meta_ptr = unsafe { self.shm.data().add(self.metadata_offset) };
        unsafe { (meta_ptr as *const u64).read() as usize }
    }

    /// Whether a live writer is attached right now.
    pub fn is_writer_connected(&self) -> bool {
        let pid = self.oieb().writer_pid.load(Ordering::Relaxed);
        pid != 0 && platform::process_exists(pid)
    }

    /// Poll for a writer to attach, up to `timeout`.
    pub fn is_writer_connected_timeout(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.is_writer_connected() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(CONNECT_POLL_INTERVAL);
        }
    }

    /// Number of frames consumed (wrap markers excluded).
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Total payload bytes consumed.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.oieb().reader_pid.store(0, Ordering::Release);
        debug!("destroying buffer '{}'", self.name);
        // Removal failures are deliberately swallowed; a later reader's
        // scrub picks up anything left behind.
        SharedMemory::remove(&self.name);
        Semaphore::remove(&names::data_sem_name(&self.name));
        Semaphore::remove(&names::space_sem_name(&self.name));
        // The mapping, semaphore handles and the lock file are released as
        // the remaining fields drop.
    }
}

/// Create a semaphore with zero permits, evicting a stale one left under
/// the same name by a crashed owner.
fn create_semaphore_fresh(name: &str) -> Result<Semaphore> {
    match Semaphore::create(name, 0) {
        Ok(sem) => Ok(sem),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            warn!("semaphore '{}' already exists, removing and retrying", name);
            Semaphore::remove(name);
            Ok(Semaphore::create(name, 0)?)
        }
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Stale-resource scrub
// ---------------------------------------------------------------------------

/// Reclaim buffers whose owners have exited without cleanup.
///
/// A buffer is stale when its lock file can be exclusively re-locked (no
/// live holder) and neither PID recorded in its OIEB refers to a live
/// process. Live buffers are never evicted: their lock file cannot be
/// reacquired. Region and semaphores are always removed together.
fn scrub_stale_resources(lock_dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(lock_dir) {
        warn!("cannot create lock directory {}: {}", lock_dir.display(), e);
        return;
    }
    let entries = match std::fs::read_dir(lock_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot scan lock directory {}: {}", lock_dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("lock") {
            continue;
        }
        if !FileLock::try_remove_stale(&path) {
            continue;
        }
        let Some(buffer) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        match SharedMemory::open(buffer) {
            Ok(shm) if shm.size() >= std::mem::size_of::<Oieb>() => {
                let oieb = unsafe { &*(shm.data() as *const Oieb) };
                let reader_pid = oieb.reader_pid.load(Ordering::Relaxed);
                let writer_pid = oieb.writer_pid.load(Ordering::Relaxed);
                let reader_dead = reader_pid == 0 || !platform::process_exists(reader_pid);
                let writer_dead = writer_pid == 0 || !platform::process_exists(writer_pid);
                if reader_dead && writer_dead {
                    drop(shm);
                    info!("scrubbing stale buffer '{}'", buffer);
                    Semaphore::remove(&names::data_sem_name(buffer));
                    Semaphore::remove(&names::space_sem_name(buffer));
                    SharedMemory::remove(buffer);
                }
            }
            _ => {
                // The region is gone or unreadable; remove whatever named
                // objects remain under this buffer's name.
                debug!("scrubbing orphaned objects for '{}'", buffer);
                Semaphore::remove(&names::data_sem_name(buffer));
                Semaphore::remove(&names::space_sem_name(buffer));
                SharedMemory::remove(buffer);
            }
        }
    }
}
