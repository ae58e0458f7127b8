// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// Error taxonomy for the zerobuffer transport. A closed sum type: every
// failure a caller can observe on the API boundary is one of these variants.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ZeroBufferError>;

/// Every error the transport surfaces to callers.
///
/// Back-pressure waits are the only retries performed inside the library;
/// everything else propagates to the immediate caller. No partial OIEB
/// update is visible on any error path.
#[derive(Debug, Error)]
pub enum ZeroBufferError {
    /// Another reader holds the lock file for this buffer name.
    #[error("buffer '{0}' is already in use by another reader")]
    BufferAlreadyInUse(String),

    /// Writer attempted to attach while no live reader owns the buffer.
    #[error("no active reader found")]
    NoReader,

    /// A second writer attempted to attach to a buffer with a live writer.
    #[error("another writer is already connected")]
    WriterAlreadyConnected,

    /// The writer observed the reader process disappear while blocked.
    #[error("reader process is dead")]
    ReaderDead,

    /// The reader observed the writer process disappear with no unread frames.
    #[error("writer process is dead")]
    WriterDead,

    /// Metadata is write-once per buffer lifetime.
    #[error("metadata has already been written")]
    MetadataAlreadyWritten,

    /// Metadata plus its 8-byte length prefix exceeds the metadata block.
    #[error("metadata too large for buffer ({size} + 8 > {capacity})")]
    MetadataTooLarge { size: usize, capacity: u64 },

    /// The metadata length prefix is inconsistent with the written byte count.
    #[error("invalid metadata size")]
    InvalidMetadata,

    /// Zero-length frames are reserved for wrap markers.
    #[error("invalid frame size: 0")]
    InvalidFrameSize,

    /// A frame plus header can never fit in the payload ring.
    #[error("frame size {size} exceeds buffer capacity {capacity}")]
    FrameTooLarge { size: usize, capacity: u64 },

    /// The writer timed out waiting for the reader to free space.
    #[error("buffer is full")]
    BufferFull,

    /// The reader observed an out-of-order frame; the buffer is corrupt or
    /// the writer restarted.
    #[error("sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    /// The OIEB header does not carry a layout this implementation speaks.
    #[error("protocol version mismatch (oieb_size={oieb_size}, major={major})")]
    VersionMismatch { oieb_size: u32, major: u8 },

    /// An OS primitive failed; carries the OS error text.
    #[error("platform error: {0}")]
    Io(#[from] io::Error),
}
