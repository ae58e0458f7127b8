// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// Duplex channel tests: request/response echo with sequence correlation,
// zero-copy requests, handler failure isolation and server lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use zerobuffer::{
    write_response, BufferConfig, DuplexClient, ImmutableDuplexServer, ZeroBufferError,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_channel(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("zb_{prefix}_{}_{n}", std::process::id())
}

fn channel_config() -> BufferConfig {
    BufferConfig::new(1024, 64 * 1024)
}

fn read_timeout() -> Duration {
    Duration::from_secs(5)
}

#[test]
fn echo_with_sequence_correlation() {
    let channel = unique_channel("echo");
    let mut server = ImmutableDuplexServer::new(&channel, channel_config()).expect("server");
    server
        .start(|request, response_writer| {
            write_response(response_writer, request.sequence(), request.data())?;
            Ok(())
        })
        .expect("start server");

    let mut client = DuplexClient::with_config(&channel, channel_config()).expect("client");
    assert!(client.is_server_connected());

    // Ten 1024-byte requests at varying intervals; every response must carry
    // its request's sequence in the first eight bytes and echo the body.
    let mut bodies: HashMap<u64, Vec<u8>> = HashMap::new();
    for i in 0..10u64 {
        let body = vec![(i * 11 % 256) as u8; 1024];
        let seq = client.send(&body).expect("send request");
        bodies.insert(seq, body);
        thread::sleep(Duration::from_millis(i * 7 % 3));
    }

    for _ in 0..10 {
        let response = client
            .read(read_timeout())
            .expect("read response")
            .expect("response before timeout");
        let seq = response.request_sequence().expect("correlation prefix");
        let expected = bodies.remove(&seq).expect("exactly one response per request");
        assert_eq!(response.payload(), &expected[..]);
    }
    assert!(bodies.is_empty());

    server.stop();
    assert!(!server.is_running());
}

#[test]
fn zero_copy_request_path() {
    let channel = unique_channel("zerocopy");
    let mut server = ImmutableDuplexServer::new(&channel, channel_config()).expect("server");
    server
        .start(|request, response_writer| {
            // Reply with the byte-wise complement.
            let body: Vec<u8> = request.data().iter().map(|b| !b).collect();
            write_response(response_writer, request.sequence(), &body)?;
            Ok(())
        })
        .expect("start server");

    let mut client = DuplexClient::with_config(&channel, channel_config()).expect("client");

    let mut pending = client.acquire_request(512).expect("acquire request");
    for (i, b) in pending.data_mut().iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }
    let seq = pending.commit().expect("commit request");

    let response = client
        .read(read_timeout())
        .expect("read")
        .expect("response");
    assert_eq!(response.request_sequence(), Some(seq));
    for (i, b) in response.payload().iter().enumerate() {
        assert_eq!(*b, !((i % 256) as u8), "mismatch at byte {i}");
    }

    server.stop();
}

#[test]
fn handler_error_does_not_kill_server() {
    let channel = unique_channel("handlererr");
    let mut server = ImmutableDuplexServer::new(&channel, channel_config()).expect("server");
    server
        .start(|request, response_writer| {
            if request.data().first() == Some(&0xFF) {
                return Err(ZeroBufferError::InvalidFrameSize);
            }
            write_response(response_writer, request.sequence(), request.data())?;
            Ok(())
        })
        .expect("start server");

    let mut client = DuplexClient::with_config(&channel, channel_config()).expect("client");

    // First request makes the handler fail; no response is produced.
    client.send(&[0xFF; 16]).expect("send poisoned request");
    // The server keeps serving afterwards.
    let seq = client.send(&[0x01; 16]).expect("send good request");

    let response = client
        .read(read_timeout())
        .expect("read")
        .expect("response");
    assert_eq!(response.request_sequence(), Some(seq));
    assert_eq!(response.payload(), &[0x01; 16][..]);

    server.stop();
}

#[test]
fn responses_bigger_than_requests() {
    let channel = unique_channel("bigresp");
    let mut server = ImmutableDuplexServer::new(&channel, channel_config()).expect("server");
    server
        .start(|request, response_writer| {
            let factor = request.data().first().copied().unwrap_or(1) as usize;
            let body = vec![0xCD; 64 * factor];
            write_response(response_writer, request.sequence(), &body)?;
            Ok(())
        })
        .expect("start server");

    let mut client = DuplexClient::with_config(&channel, channel_config()).expect("client");

    for factor in [1u8, 4, 16] {
        let seq = client.send(&[factor]).expect("send");
        let response = client
            .read(read_timeout())
            .expect("read")
            .expect("response");
        assert_eq!(response.request_sequence(), Some(seq));
        assert_eq!(response.payload().len(), 64 * factor as usize);
    }

    server.stop();
}

#[test]
fn second_start_is_rejected() {
    let channel = unique_channel("doublestart");
    let mut server = ImmutableDuplexServer::new(&channel, channel_config()).expect("server");
    server.start(|_, _| Ok(())).expect("first start");
    assert!(server.start(|_, _| Ok(())).is_err());
    server.stop();
}

#[test]
fn stop_joins_worker_and_tears_down() {
    let channel = unique_channel("stop");
    let mut server = ImmutableDuplexServer::new(&channel, channel_config()).expect("server");
    server
        .start(|request, response_writer| {
            write_response(response_writer, request.sequence(), request.data())?;
            Ok(())
        })
        .expect("start");
    assert!(server.is_running());

    let mut client = DuplexClient::with_config(&channel, channel_config()).expect("client");
    client.send(b"ping").expect("send");
    let response = client.read(read_timeout()).expect("read").expect("response");
    assert_eq!(response.payload(), b"ping");
    drop(response);
    drop(client);

    server.stop();
    assert!(!server.is_running());

    // The request ring died with the server; a fresh server can take over
    // the channel name.
    let _server2 = ImmutableDuplexServer::new(&channel, channel_config()).expect("reuse channel");
}
