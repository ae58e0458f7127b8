// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// Writer side of a buffer. The writer holds a non-owning attachment to a
// region created by a reader: it validates the OIEB, publishes its PID,
// optionally writes the one-shot metadata and then streams frames, blocking
// on the space-available semaphore when the ring is full.

use std::sync::atomic::{fence, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Result, ZeroBufferError};
use crate::names;
use crate::platform::{self, Semaphore, SharedMemory};
use crate::types::{FrameHeader, Oieb, FRAME_HEADER_SIZE};

/// Default cap on how long a write blocks waiting for free space.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// Longest single semaphore wait between reader-liveness re-checks. Long
// enough to avoid busy re-scans, short enough to notice a crashed reader.
const SPACE_WAIT_SLICE: Duration = Duration::from_secs(5);

/// Attaches to an existing buffer and writes frames into its ring.
///
/// At most one writer may be attached to a buffer; a second attachment
/// fails with [`ZeroBufferError::WriterAlreadyConnected`]. Dropping the
/// writer clears its PID from the OIEB but never removes the named objects:
/// the reader owns those.
#[derive(Debug)]
pub struct Writer {
    name: String,
    shm: SharedMemory,
    sem_data: Semaphore,
    sem_space: Semaphore,
    metadata_offset: usize,
    payload_offset: usize,
    payload_size: u64,
    sequence_number: u64,
    frames_written: u64,
    bytes_written: u64,
    metadata_written: bool,
    pending_metadata: Option<usize>,
    write_timeout: Duration,
}

impl Writer {
    /// Attach to the named buffer.
    pub fn connect(name: &str) -> Result<Self> {
        let shm = SharedMemory::open(name)?;
        if shm.size() < std::mem::size_of::<Oieb>() {
            return Err(ZeroBufferError::VersionMismatch {
                oieb_size: 0,
                major: 0,
            });
        }

        let oieb = unsafe { &*(shm.data() as *const Oieb) };
        let oieb_size = oieb.oieb_size.load(Ordering::Relaxed);
        let version = oieb.version();
        if oieb_size != 128 || version.major != 1 {
            return Err(ZeroBufferError::VersionMismatch {
                oieb_size,
                major: version.major,
            });
        }

        let reader_pid = oieb.reader_pid.load(Ordering::Acquire);
        if reader_pid == 0 || !platform::process_exists(reader_pid) {
            return Err(ZeroBufferError::NoReader);
        }
        let writer_pid = oieb.writer_pid.load(Ordering::Relaxed);
        if writer_pid != 0 && platform::process_exists(writer_pid) {
            return Err(ZeroBufferError::WriterAlreadyConnected);
        }

        oieb.writer_pid
            .store(platform::current_pid(), Ordering::Release);

        let sems = Semaphore::open(&names::data_sem_name(name))
            .and_then(|data| Ok((data, Semaphore::open(&names::space_sem_name(name))?)));
        let (sem_data, sem_space) = match sems {
            Ok(pair) => pair,
            Err(e) => {
                // Leave no half-attached writer behind.
                oieb.writer_pid.store(0, Ordering::Release);
                return Err(e.into());
            }
        };

        let metadata_size = oieb.metadata_size.load(Ordering::Relaxed) as usize;
        let payload_size = oieb.payload_size.load(Ordering::Relaxed);
        let metadata_written = oieb.metadata_written_bytes.load(Ordering::Acquire) > 0;

        debug!("attached to buffer '{}' (payload={})", name, payload_size);

        Ok(Self {
            name: name.to_string(),
            shm,
            sem_data,
            sem_space,
            metadata_offset: std::mem::size_of::<Oieb>(),
            payload_offset: std::mem::size_of::<Oieb>() + metadata_size,
            payload_size,
            sequence_number: 1,
            frames_written: 0,
            bytes_written: 0,
            metadata_written,
            pending_metadata: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    fn oieb(&self) -> &Oieb {
        unsafe { &*(self.shm.data() as *const Oieb) }
    }

    fn write_header(&self, pos: u64, header: FrameHeader) {
        unsafe {
            std::ptr::write_unaligned(
                self.shm.data().add(self.payload_offset + pos as usize) as *mut FrameHeader,
                header,
            );
        }
    }

    /// The buffer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cap on how long a write may block waiting for free space before
    /// failing with [`ZeroBufferError::BufferFull`].
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    // -- metadata ----------------------------------------------------------

    /// Write the one-shot metadata. Fails on a second call.
    pub fn set_metadata(&mut self, data: &[u8]) -> Result<()> {
        self.acquire_metadata(data.len())?.copy_from_slice(data);
        self.commit_metadata()
    }

    /// Zero-copy variant of [`Writer::set_metadata`]: returns the writable
    /// metadata region; call [`Writer::commit_metadata`] once it is filled.
    pub fn acquire_metadata(&mut self, len: usize) -> Result<&mut [u8]> {
        if self.metadata_written {
            return Err(ZeroBufferError::MetadataAlreadyWritten);
        }
        let capacity = self.oieb().metadata_size.load(Ordering::Relaxed);
        if len as u64 + 8 > capacity {
            return Err(ZeroBufferError::MetadataTooLarge {
                size: len,
                capacity,
            });
        }
        self.pending_metadata = Some(len);
        let ptr = unsafe { self.shm.data().add(self.metadata_offset + 8) };
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Publish metadata staged by [`Writer::acquire_metadata`].
    pub fn commit_metadata(&mut self) -> Result<()> {
        if self.metadata_written {
            return Err(ZeroBufferError::MetadataAlreadyWritten);
        }
        let Some(len) = self.pending_metadata.take() else {
            return Err(ZeroBufferError::InvalidMetadata);
        };
        let oieb = self.oieb();
        let total = 8 + len as u64;
        // Length prefix first, then the Release store publishing it.
        unsafe { (self.shm.data().add(self.metadata_offset) as *mut u64).write(len as u64) };
        oieb.metadata_written_bytes.store(total, Ordering::Release);
        oieb.metadata_free_bytes.store(
            oieb.metadata_size.load(Ordering::Relaxed) - total,
            Ordering::Relaxed,
        );
        self.metadata_written = true;
        Ok(())
    }

    // -- frames ------------------------------------------------------------

    /// Copying write: reserve, copy `data` in, commit. Returns the frame's
    /// sequence number.
    pub fn write_frame(&mut self, data: &[u8]) -> Result<u64> {
        let mut frame = self.acquire_frame(data.len())?;
        frame.data_mut().copy_from_slice(data);
        frame.commit()
    }

    /// Zero-copy write: reserve `size` payload bytes in the ring and write
    /// the frame header. The returned guard exposes the payload region; the
    /// frame becomes visible to the reader only on
    /// [`PendingFrame::commit`]. Dropping the guard abandons the
    /// reservation.
    ///
    /// Blocks while the ring lacks continuous space, up to the configured
    /// write timeout.
    pub fn acquire_frame(&mut self, size: usize) -> Result<PendingFrame<'_>> {
        if size == 0 {
            return Err(ZeroBufferError::InvalidFrameSize);
        }
        let total = (FRAME_HEADER_SIZE + size) as u64;
        if total > self.payload_size {
            return Err(ZeroBufferError::FrameTooLarge {
                size,
                capacity: self.payload_size - FRAME_HEADER_SIZE as u64,
            });
        }

        self.wait_for_space(total)?;

        let oieb = self.oieb();
        let n = self.payload_size;
        let write_pos = oieb.payload_write_pos.load(Ordering::Relaxed);
        let space_to_end = n - write_pos;

        if space_to_end < total && oieb.payload_read_pos.load(Ordering::Acquire) > 0 {
            // Wrap to offset 0. A marker tells the reader to skip the tail;
            // when the tail cannot even hold a header the reader detects the
            // wrap from the truncated tail itself.
            if space_to_end >= FRAME_HEADER_SIZE as u64 {
                self.write_header(write_pos, FrameHeader::WRAP_MARKER);
                oieb.payload_written_count.fetch_add(1, Ordering::Relaxed);
            }
            // The skipped tail is debited against free space here and
            // credited back by the reader when it consumes the wrap.
            oieb.payload_free_bytes
                .fetch_sub(space_to_end, Ordering::AcqRel);
            oieb.payload_write_pos.store(0, Ordering::Relaxed);
            debug!(
                "wrap at {} in '{}', {} tail bytes skipped",
                write_pos, self.name, space_to_end
            );
        }

        let write_pos = oieb.payload_write_pos.load(Ordering::Relaxed);
        let sequence = self.sequence_number;
        self.write_header(
            write_pos,
            FrameHeader {
                payload_size: size as u64,
                sequence_number: sequence,
            },
        );

        Ok(PendingFrame {
            writer: self,
            write_pos,
            size,
            total,
            sequence,
        })
    }

    /// Block until the ring has `total` continuous bytes available, the
    /// reader dies, or the write timeout elapses.
    fn wait_for_space(&self, total: u64) -> Result<()> {
        let deadline = Instant::now() + self.write_timeout;
        loop {
            if !self.is_reader_connected() {
                return Err(ZeroBufferError::ReaderDead);
            }
            if self.continuous_free_space() >= total {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ZeroBufferError::BufferFull);
            }
            let slice = (deadline - now).min(SPACE_WAIT_SLICE);
            if !self.sem_space.wait(Some(slice))? && !self.is_reader_connected() {
                return Err(ZeroBufferError::ReaderDead);
            }
        }
    }

    /// Largest frame (header included) that can be placed contiguously right
    /// now. Space to the end of the ring is the only admissible region
    /// unless the reader has left offset 0, in which case wrapping makes the
    /// released run at the start usable. Both runs are bounded by
    /// `payload_free_bytes` so bytes still borrowed by an unreleased frame
    /// are never handed out again.
    fn continuous_free_space(&self) -> u64 {
        let oieb = self.oieb();
        let n = self.payload_size;
        let write_pos = oieb.payload_write_pos.load(Ordering::Relaxed);
        let read_pos = oieb.payload_read_pos.load(Ordering::Acquire);
        let free = oieb.payload_free_bytes.load(Ordering::Acquire);

        let space_to_end = n - write_pos;
        let at_end = free.min(space_to_end);
        if read_pos > 0 {
            let at_start = free.saturating_sub(space_to_end).min(read_pos);
            at_end.max(at_start)
        } else {
            at_end
        }
    }

    /// Whether a live reader still owns the buffer.
    pub fn is_reader_connected(&self) -> bool {
        let pid = self.oieb().reader_pid.load(Ordering::Relaxed);
        pid != 0 && platform::process_exists(pid)
    }

    /// Number of frames committed (wrap markers excluded).
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Total payload bytes committed.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.oieb().writer_pid.store(0, Ordering::Release);
        debug!("detached from buffer '{}'", self.name);
    }
}

// ---------------------------------------------------------------------------
// PendingFrame
// ---------------------------------------------------------------------------

/// A reserved, not-yet-visible frame in the ring.
///
/// Produced by [`Writer::acquire_frame`]. Fill [`PendingFrame::data_mut`],
/// then [`PendingFrame::commit`]; until then the reader cannot observe the
/// frame. Dropping the guard without committing abandons the reservation
/// and reuses the sequence number for the next frame.
pub struct PendingFrame<'a> {
    writer: &'a mut Writer,
    write_pos: u64,
    size: usize,
    total: u64,
    sequence: u64,
}

impl PendingFrame<'_> {
    /// The sequence number this frame takes when committed.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The writable payload region inside the ring.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let offset = self.writer.payload_offset + self.write_pos as usize + FRAME_HEADER_SIZE;
        unsafe { std::slice::from_raw_parts_mut(self.writer.shm.data().add(offset), self.size) }
    }

    /// Publish the frame: advance the write position, debit free space,
    /// fence, and signal "data-available". Returns the sequence number.
    pub fn commit(self) -> Result<u64> {
        let writer = self.writer;
        let oieb = writer.oieb();

        let mut new_pos = self.write_pos + self.total;
        if new_pos >= writer.payload_size {
            new_pos -= writer.payload_size;
        }
        oieb.payload_write_pos.store(new_pos, Ordering::Relaxed);
        oieb.payload_free_bytes.fetch_sub(self.total, Ordering::AcqRel);
        oieb.payload_written_count.fetch_add(1, Ordering::Relaxed);

        writer.sequence_number += 1;
        writer.frames_written += 1;
        writer.bytes_written += self.size as u64;

        fence(Ordering::Release);
        writer.sem_data.signal()?;
        Ok(self.sequence)
    }
}
