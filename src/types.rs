// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// On-wire protocol types: the Operation Info Exchange Block (OIEB), the
// per-frame header, buffer configuration, and the zero-copy Frame borrow.
// The byte layout is fixed by the protocol and identical across languages;
// sizes and offsets are asserted at compile time.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use crate::platform::Semaphore;

// All OIEB fields are little-endian on the wire. Aligned native atomics are
// used for access, so the host byte order must match.
#[cfg(not(target_endian = "little"))]
compile_error!("zerobuffer's on-wire layout requires a little-endian target");

/// Alignment of the OIEB, metadata and payload blocks.
pub const BLOCK_ALIGNMENT: usize = 64;

/// Size of the per-frame header preceding every payload in the ring.
pub const FRAME_HEADER_SIZE: usize = std::mem::size_of::<FrameHeader>();

// ---------------------------------------------------------------------------
// ProtocolVersion — four packed bytes at OIEB offset 4
// ---------------------------------------------------------------------------

/// Protocol version as stored in the OIEB: one byte each for major, minor,
/// patch and a reserved zero byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub reserved: u8,
}

impl ProtocolVersion {
    /// The version this implementation writes at buffer creation.
    pub const CURRENT: Self = Self::new(1, 0, 0);

    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            reserved: 0,
        }
    }

    pub(crate) fn to_raw(self) -> u32 {
        u32::from_le_bytes([self.major, self.minor, self.patch, self.reserved])
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        let [major, minor, patch, reserved] = raw.to_le_bytes();
        Self {
            major,
            minor,
            patch,
            reserved,
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ---------------------------------------------------------------------------
// OIEB — Operation Info Exchange Block
// ---------------------------------------------------------------------------

/// The 128-byte shared header at offset 0 of the region.
///
/// Each field has a single logical owner (reader or writer), so aligned
/// 64-bit stores suffice under the fence discipline. The one exception is
/// `payload_free_bytes`, which both sides read-modify-write concurrently
/// (writer debits, reader credits) and therefore must use atomic fetch-add
/// and fetch-sub.
#[repr(C, align(64))]
pub struct Oieb {
    /// Always 128 in v1.x.
    pub(crate) oieb_size: AtomicU32,
    /// Packed [`ProtocolVersion`] bytes.
    pub(crate) version: AtomicU32,
    pub(crate) metadata_size: AtomicU64,
    pub(crate) metadata_free_bytes: AtomicU64,
    /// Total metadata bytes occupied, including the 8-byte length prefix.
    /// Transitions 0 -> 8+L exactly once.
    pub(crate) metadata_written_bytes: AtomicU64,
    pub(crate) payload_size: AtomicU64,
    pub(crate) payload_free_bytes: AtomicU64,
    pub(crate) payload_write_pos: AtomicU64,
    pub(crate) payload_read_pos: AtomicU64,
    /// Frames committed, wrap markers included.
    pub(crate) payload_written_count: AtomicU64,
    /// Frames consumed, wrap markers included.
    pub(crate) payload_read_count: AtomicU64,
    /// 0 means no writer.
    pub(crate) writer_pid: AtomicU64,
    /// 0 means no reader.
    pub(crate) reader_pid: AtomicU64,
    _reserved: [u64; 4],
}

const _: () = assert!(std::mem::size_of::<Oieb>() == 128);
const _: () = assert!(std::mem::align_of::<Oieb>() == BLOCK_ALIGNMENT);
const _: () = assert!(std::mem::offset_of!(Oieb, version) == 4);
const _: () = assert!(std::mem::offset_of!(Oieb, metadata_size) == 8);
const _: () = assert!(std::mem::offset_of!(Oieb, payload_size) == 32);
const _: () = assert!(std::mem::offset_of!(Oieb, payload_free_bytes) == 40);
const _: () = assert!(std::mem::offset_of!(Oieb, payload_write_pos) == 48);
const _: () = assert!(std::mem::offset_of!(Oieb, payload_read_pos) == 56);
const _: () = assert!(std::mem::offset_of!(Oieb, writer_pid) == 80);
const _: () = assert!(std::mem::offset_of!(Oieb, reader_pid) == 88);

impl Oieb {
    /// Initialise a freshly created (zero-filled) buffer header.
    pub(crate) fn init(&self, metadata_size: u64, payload_size: u64, reader_pid: u64) {
        self.oieb_size.store(128, Ordering::Relaxed);
        self.version
            .store(ProtocolVersion::CURRENT.to_raw(), Ordering::Relaxed);
        self.metadata_size.store(metadata_size, Ordering::Relaxed);
        self.metadata_free_bytes
            .store(metadata_size, Ordering::Relaxed);
        self.metadata_written_bytes.store(0, Ordering::Relaxed);
        self.payload_size.store(payload_size, Ordering::Relaxed);
        self.payload_free_bytes
            .store(payload_size, Ordering::Relaxed);
        self.payload_write_pos.store(0, Ordering::Relaxed);
        self.payload_read_pos.store(0, Ordering::Relaxed);
        self.payload_written_count.store(0, Ordering::Relaxed);
        self.payload_read_count.store(0, Ordering::Relaxed);
        self.writer_pid.store(0, Ordering::Relaxed);
        self.reader_pid.store(reader_pid, Ordering::Release);
    }

    pub(crate) fn version(&self) -> ProtocolVersion {
        ProtocolVersion::from_raw(self.version.load(Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// FrameHeader — 16 bytes preceding every payload in the ring
// ---------------------------------------------------------------------------

/// Per-frame header. A `payload_size` of 0 denotes a wrap marker telling the
/// reader to continue at offset 0; wrap markers carry sequence number 0.
///
/// Frame headers land at arbitrary offsets inside the ring, so they are
/// always accessed with unaligned reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FrameHeader {
    pub payload_size: u64,
    pub sequence_number: u64,
}

const _: () = assert!(std::mem::size_of::<FrameHeader>() == 16);

impl FrameHeader {
    pub(crate) const WRAP_MARKER: Self = Self {
        payload_size: 0,
        sequence_number: 0,
    };
}

// ---------------------------------------------------------------------------
// BufferConfig
// ---------------------------------------------------------------------------

/// Capacities requested for a new buffer. Both are aligned up to
/// [`BLOCK_ALIGNMENT`] internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Capacity of the one-shot metadata block, bytes.
    pub metadata_size: usize,
    /// Capacity of the frame ring, bytes.
    pub payload_size: usize,
}

impl BufferConfig {
    pub const fn new(metadata_size: usize, payload_size: usize) -> Self {
        Self {
            metadata_size,
            payload_size,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::new(1024, 1024 * 1024)
    }
}

// ---------------------------------------------------------------------------
// Frame — scoped borrow of payload bytes
// ---------------------------------------------------------------------------

/// Releases a consumed frame's bytes back to the ring.
///
/// Held by value inside [`Frame`]; dropping it credits `payload_free_bytes`,
/// issues a release fence and signals "space-available" so a blocked writer
/// wakes up.
pub(crate) struct ReleaseToken<'a> {
    oieb: &'a Oieb,
    space_sem: &'a Semaphore,
    total_size: u64,
}

impl<'a> ReleaseToken<'a> {
    pub(crate) fn new(oieb: &'a Oieb, space_sem: &'a Semaphore, total_size: u64) -> Self {
        Self {
            oieb,
            space_sem,
            total_size,
        }
    }
}

impl Drop for ReleaseToken<'_> {
    fn drop(&mut self) {
        self.oieb
            .payload_free_bytes
            .fetch_add(self.total_size, Ordering::AcqRel);
        fence(Ordering::Release);
        if let Err(e) = self.space_sem.signal() {
            tracing::warn!("failed to signal space-available on frame release: {}", e);
        }
    }
}

/// A frame read from the ring: a borrow of the payload bytes plus the
/// sequence number the writer assigned.
///
/// The borrow ties the frame to its `Reader`; a frame cannot outlive the
/// reader it came from. Dropping the frame releases the underlying ring
/// bytes and wakes the writer.
pub struct Frame<'a> {
    data: &'a [u8],
    sequence: u64,
    _release: ReleaseToken<'a>,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(data: &'a [u8], sequence: u64, release: ReleaseToken<'a>) -> Self {
        Self {
            data,
            sequence,
            _release: release,
        }
    }

    /// The payload bytes, valid until the frame is dropped.
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The writer-assigned sequence number (1-based, monotonic).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_version_round_trip() {
        let v = ProtocolVersion::new(1, 2, 3);
        assert_eq!(ProtocolVersion::from_raw(v.to_raw()), v);
    }

    #[test]
    fn protocol_version_byte_order() {
        // major is the lowest-addressed byte of the packed field
        let raw = ProtocolVersion::CURRENT.to_raw();
        assert_eq!(raw.to_le_bytes()[0], 1);
    }

    #[test]
    fn default_config() {
        let c = BufferConfig::default();
        assert_eq!(c.metadata_size, 1024);
        assert_eq!(c.payload_size, 1024 * 1024);
    }
}
