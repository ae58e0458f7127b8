// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors

//! Single-producer, single-consumer inter-process byte-stream transport over
//! a named shared-memory ring buffer with semaphore signalling.
//!
//! A [`Reader`] creates a named buffer (a 128-byte OIEB header, a one-shot
//! metadata block and a payload ring) plus two counting semaphores; a
//! [`Writer`] in another process attaches by name and streams length-prefixed
//! frames through the ring with zero mandatory copies on the write path.
//! Crashed peers are detected via PIDs published in the OIEB, and their
//! leftover kernel objects are reclaimed by the next reader's stale-resource
//! scrub.
//!
//! [`ImmutableDuplexServer`] and [`DuplexClient`] pair two such buffers into
//! a request/response channel with sequence-number correlation.
//!
//! The crate is synchronous and thread-based: every blocking call takes a
//! timeout, and no async runtime is involved. Logging goes through the
//! `tracing` facade; callers that install no subscriber get no output.

pub mod error;
pub use error::{Result, ZeroBufferError};

pub mod types;
pub use types::{BufferConfig, Frame, FrameHeader, Oieb, ProtocolVersion, BLOCK_ALIGNMENT};

pub mod platform;

mod names;

mod reader;
pub use reader::Reader;

mod writer;
pub use writer::{PendingFrame, Writer, DEFAULT_WRITE_TIMEOUT};

mod duplex;
pub use duplex::{
    write_response, DuplexClient, DuplexResponse, ImmutableDuplexServer, DEFAULT_RESPONSE_CONFIG,
};
