// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// Request/response channel built from two rings: `<channel>_request`
// (client writes, server reads) and `<channel>_response` (server writes,
// client reads). Responses carry an 8-byte little-endian prefix holding the
// originating request's sequence number; clients correlate by prefix since
// responses arrive in server completion order.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace};

use crate::error::{Result, ZeroBufferError};
use crate::names;
use crate::reader::Reader;
use crate::types::{BufferConfig, Frame};
use crate::writer::{PendingFrame, Writer};

/// Response buffer configuration used by [`DuplexClient::connect`]:
/// 4 KiB metadata, 256 MiB payload.
pub const DEFAULT_RESPONSE_CONFIG: BufferConfig = BufferConfig::new(4096, 256 * 1024 * 1024);

// The server retries connecting to the client's response buffer for ~5 s.
const RESPONSE_CONNECT_RETRIES: u32 = 50;
const RESPONSE_CONNECT_DELAY: Duration = Duration::from_millis(100);

// Poll cadence of the server's request loop; bounds stop() latency.
const REQUEST_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Write a response for `request_sequence` through the zero-copy API:
/// 8-byte little-endian sequence prefix followed by `body`.
pub fn write_response(writer: &mut Writer, request_sequence: u64, body: &[u8]) -> Result<u64> {
    let mut frame = writer.acquire_frame(8 + body.len())?;
    let data = frame.data_mut();
    data[..8].copy_from_slice(&request_sequence.to_le_bytes());
    data[8..].copy_from_slice(body);
    frame.commit()
}

// ---------------------------------------------------------------------------
// ImmutableDuplexServer
// ---------------------------------------------------------------------------

/// Server half of a duplex channel, for handlers that treat the request as
/// immutable.
///
/// Construction creates the request ring; [`start`](Self::start) spawns the
/// worker thread that connects to the client's response ring and pumps
/// requests through the handler. The handler writes its response directly
/// through the response [`Writer`], by convention via [`write_response`].
pub struct ImmutableDuplexServer {
    channel_name: String,
    reader: Option<Reader>,
    worker: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl ImmutableDuplexServer {
    /// Create the `<channel>_request` ring and prepare to serve.
    pub fn new(channel: &str, config: BufferConfig) -> Result<Self> {
        let reader = Reader::new(&names::request_buffer_name(channel), config)?;
        Ok(Self {
            channel_name: channel.to_string(),
            reader: Some(reader),
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The channel name.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Spawn the worker thread. A handler error is logged and the loop
    /// continues; the server runs until [`stop`](Self::stop).
    pub fn start<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(&Frame<'_>, &mut Writer) -> Result<()> + Send + 'static,
    {
        let Some(mut reader) = self.reader.take() else {
            return Err(ZeroBufferError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "duplex server already started",
            )));
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let channel = self.channel_name.clone();
        let response_name = names::response_buffer_name(&self.channel_name);

        info!("starting duplex server on channel '{}'", channel);

        let worker = thread::Builder::new()
            .name(format!("zerobuffer-duplex-{channel}"))
            .spawn(move || {
                let Some(mut writer) = connect_response_writer(&response_name, &running) else {
                    running.store(false, Ordering::SeqCst);
                    return;
                };
                debug!("duplex server '{}' connected to response ring", channel);

                while running.load(Ordering::SeqCst) {
                    match reader.read_frame(REQUEST_POLL_INTERVAL) {
                        Ok(Some(request)) => {
                            trace!(
                                "channel '{}': request seq={} len={}",
                                channel,
                                request.sequence(),
                                request.len()
                            );
                            if let Err(e) = handler(&request, &mut writer) {
                                error!("channel '{}': handler error: {}", channel, e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            if running.load(Ordering::SeqCst) {
                                error!("channel '{}': read error: {}", channel, e);
                            }
                        }
                    }
                }
            })
            .map_err(ZeroBufferError::Io)?;

        self.worker = Some(worker);
        Ok(())
    }

    /// Signal the worker to exit and join it. The request ring is destroyed
    /// with the worker's reader.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ImmutableDuplexServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn connect_response_writer(name: &str, running: &AtomicBool) -> Option<Writer> {
    for _ in 0..RESPONSE_CONNECT_RETRIES {
        if !running.load(Ordering::SeqCst) {
            return None;
        }
        match Writer::connect(name) {
            Ok(writer) => return Some(writer),
            Err(e) => {
                trace!("response ring '{}' not ready: {}", name, e);
                thread::sleep(RESPONSE_CONNECT_DELAY);
            }
        }
    }
    error!("timed out waiting for response ring '{}'", name);
    None
}

// ---------------------------------------------------------------------------
// DuplexClient
// ---------------------------------------------------------------------------

/// Client half of a duplex channel: writes requests, owns the response ring.
pub struct DuplexClient {
    request_writer: Writer,
    response_reader: Reader,
}

impl DuplexClient {
    /// Connect with the default response configuration
    /// ([`DEFAULT_RESPONSE_CONFIG`]). The server must already have created
    /// the request ring.
    pub fn connect(channel: &str) -> Result<Self> {
        Self::with_config(channel, DEFAULT_RESPONSE_CONFIG)
    }

    /// Connect with a caller-supplied response buffer configuration.
    pub fn with_config(channel: &str, response_config: BufferConfig) -> Result<Self> {
        let request_writer = Writer::connect(&names::request_buffer_name(channel))?;
        let response_reader = Reader::new(&names::response_buffer_name(channel), response_config)?;
        debug!("duplex client connected on channel '{}'", channel);
        Ok(Self {
            request_writer,
            response_reader,
        })
    }

    /// Copying request write. Returns the request's sequence number for
    /// correlation.
    pub fn send(&mut self, data: &[u8]) -> Result<u64> {
        self.request_writer.write_frame(data)
    }

    /// Zero-copy request write: fill the returned region, then commit it to
    /// obtain the sequence number.
    pub fn acquire_request(&mut self, size: usize) -> Result<PendingFrame<'_>> {
        self.request_writer.acquire_frame(size)
    }

    /// Read the next response. Responses arrive in server completion order;
    /// correlate via [`DuplexResponse::request_sequence`].
    pub fn read(&mut self, timeout: Duration) -> Result<Option<DuplexResponse<'_>>> {
        Ok(self
            .response_reader
            .read_frame(timeout)?
            .map(|frame| DuplexResponse { frame }))
    }

    /// Mirrors the request writer's reader-liveness check.
    pub fn is_server_connected(&self) -> bool {
        self.request_writer.is_reader_connected()
    }
}

// ---------------------------------------------------------------------------
// DuplexResponse
// ---------------------------------------------------------------------------

/// A response frame: the originating request's sequence number followed by
/// the application body.
pub struct DuplexResponse<'a> {
    frame: Frame<'a>,
}

impl<'a> DuplexResponse<'a> {
    /// Sequence number of the request this response answers, or `None` for
    /// a malformed response shorter than the 8-byte prefix.
    pub fn request_sequence(&self) -> Option<u64> {
        let prefix = self.frame.data().get(..8)?;
        Some(u64::from_le_bytes(prefix.try_into().ok()?))
    }

    /// The application body after the correlation prefix.
    pub fn payload(&self) -> &[u8] {
        self.frame.data().get(8..).unwrap_or(&[])
    }

    /// The underlying response frame.
    pub fn frame(&self) -> &Frame<'a> {
        &self.frame
    }
}
