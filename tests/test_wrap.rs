// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 zerobuffer contributors
//
// Wrap-around behaviour of the payload ring: wrap markers, accounting of
// the wasted tail, the markerless short-tail wrap, and exact-fit frames.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use zerobuffer::platform::SharedMemory;
use zerobuffer::{BufferConfig, Reader, Writer, ZeroBufferError};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("zb_{prefix}_{}_{n}", std::process::id())
}

fn read_timeout() -> Duration {
    Duration::from_secs(5)
}

// OIEB field offsets, fixed by the wire layout.
const OFF_WRITTEN_COUNT: usize = 64;
const OFF_READ_COUNT: usize = 72;

fn peek_u64(shm: &SharedMemory, offset: usize) -> u64 {
    unsafe { (shm.data().add(offset) as *const u64).read() }
}

#[test]
fn wrap_marker_emitted_and_counted() {
    let name = unique_name("wrap");
    let mut reader = Reader::new(&name, BufferConfig::new(1024, 10240)).expect("create reader");
    let mut writer = Writer::connect(&name).expect("connect writer");

    // Two 4096-byte frames occupy 8224 bytes; the 2016-byte tail cannot hold
    // a third, so it forces a wrap marker once the reader has left offset 0.
    for i in 0..2u8 {
        writer.write_frame(&[i; 4096]).expect("write frame");
    }
    for _ in 0..2 {
        let frame = reader
            .read_frame(read_timeout())
            .expect("read")
            .expect("frame");
        drop(frame);
    }

    writer.write_frame(&[2u8; 4096]).expect("write third frame");

    let shm = SharedMemory::open(&name).expect("open region");
    // Two frames + one wrap marker committed so far.
    assert_eq!(peek_u64(&shm, OFF_WRITTEN_COUNT), 3);

    let frame = reader
        .read_frame(read_timeout())
        .expect("read")
        .expect("frame");
    assert_eq!(frame.sequence(), 3);
    assert_eq!(frame.data(), &[2u8; 4096][..]);
    drop(frame);

    // The reader consumed two frames, the marker, and the wrapped frame.
    assert_eq!(peek_u64(&shm, OFF_READ_COUNT), 4);
    // Wrap markers are not logical frames.
    assert_eq!(reader.frames_read(), 3);
    assert_eq!(writer.frames_written(), 3);
}

#[test]
fn exact_fit_frame() {
    let name = unique_name("exactfit");
    let mut reader = Reader::new(&name, BufferConfig::new(1024, 10240)).expect("create reader");
    let mut writer = Writer::connect(&name).expect("connect writer");

    // Header + payload fill the ring to the last byte.
    let payload = vec![0x5A; 10240 - 16];
    writer.write_frame(&payload).expect("exact-fit frame");

    let frame = reader
        .read_frame(read_timeout())
        .expect("read")
        .expect("frame");
    assert_eq!(frame.len(), 10240 - 16);
    assert_eq!(frame.data(), &payload[..]);
    drop(frame);

    // Once released, a second exact-fit frame must also succeed.
    writer.write_frame(&payload).expect("second exact-fit frame");
    let frame = reader
        .read_frame(read_timeout())
        .expect("read")
        .expect("frame");
    assert_eq!(frame.sequence(), 2);
}

#[test]
fn short_tail_blocks_until_reader_advances() {
    let name = unique_name("shorttail");
    let mut reader = Reader::new(&name, BufferConfig::new(1024, 10240)).expect("create reader");
    let mut writer = Writer::connect(&name).expect("connect writer");
    writer.set_write_timeout(Duration::from_millis(100));

    // Leave an 8-byte tail: too small even for a wrap marker.
    writer.write_frame(&vec![1u8; 10240 - 16 - 8]).expect("first frame");

    // With the reader still at offset 0 no wrap is possible; the writer must
    // block and time out.
    match writer.write_frame(&[2u8; 1024]) {
        Err(ZeroBufferError::BufferFull) => {}
        other => panic!("expected BufferFull, got {other:?}"),
    }

    // After the reader consumes and releases the first frame the writer
    // wraps (markerless, the tail cannot hold a header) and makes progress.
    let frame = reader
        .read_frame(read_timeout())
        .expect("read")
        .expect("frame");
    assert_eq!(frame.sequence(), 1);
    drop(frame);

    writer.set_write_timeout(Duration::from_secs(5));
    writer.write_frame(&[2u8; 1024]).expect("write after release");

    let frame = reader
        .read_frame(read_timeout())
        .expect("read")
        .expect("frame");
    assert_eq!(frame.sequence(), 2);
    assert_eq!(frame.data(), &[2u8; 1024][..]);
}

#[test]
fn free_space_fully_restored_after_release() {
    let name = unique_name("restore");
    let mut reader = Reader::new(&name, BufferConfig::new(1024, 10240)).expect("create reader");
    let mut writer = Writer::connect(&name).expect("connect writer");

    // Cycle through several wraps.
    for round in 1..=5u64 {
        writer.write_frame(&vec![round as u8; 4096]).expect("write");
        writer.write_frame(&vec![round as u8; 4096]).expect("write");
        for _ in 0..2 {
            let frame = reader
                .read_frame(read_timeout())
                .expect("read")
                .expect("frame");
            assert_eq!(frame.data()[0], round as u8);
            drop(frame);
        }
    }

    // Every byte, including all wrap waste, must have been credited back:
    // the written and read counts agree and the ring accepts a frame as
    // large as the gap between the current positions allows.
    let shm = SharedMemory::open(&name).expect("open region");
    assert_eq!(
        peek_u64(&shm, OFF_WRITTEN_COUNT),
        peek_u64(&shm, OFF_READ_COUNT)
    );
    writer.write_frame(&vec![9u8; 4096]).expect("ring still usable");
    let frame = reader
        .read_frame(read_timeout())
        .expect("read")
        .expect("frame");
    assert_eq!(frame.data(), &vec![9u8; 4096][..]);
}

#[test]
fn many_wraps_preserve_order_and_content() {
    let name = unique_name("manywraps");
    let mut reader = Reader::new(&name, BufferConfig::new(1024, 4096)).expect("create reader");
    let mut writer = Writer::connect(&name).expect("connect writer");

    // 1500-byte frames in a 4096-byte ring wrap on almost every other write.
    for seq in 1..=40u64 {
        writer.write_frame(&vec![(seq % 256) as u8; 1500]).expect("write");
        let frame = reader
            .read_frame(read_timeout())
            .expect("read")
            .expect("frame");
        assert_eq!(frame.sequence(), seq);
        assert!(frame.data().iter().all(|&b| b == (seq % 256) as u8));
    }
}
