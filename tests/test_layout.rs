// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Record layouts and the shared mapping. The sizes here are part of the
// plug-in ABI and of the emitted stream, so they are pinned by test.

use decdiff::{
    DecodeStatus, InputSlot, OutputChunk, OutputSlot, SharedMap, DEC_MAXLEN, INSN_MAXLEN,
    OUTPUT_HEADER_LEN,
};

#[test]
fn record_sizes() {
    assert_eq!(std::mem::size_of::<InputSlot>(), 27);
    assert_eq!(std::mem::size_of::<OutputSlot>(), 8 + DEC_MAXLEN);
    assert_eq!(OUTPUT_HEADER_LEN, 8);
}

#[test]
fn input_slot_set_and_bytes() {
    let mut slot = InputSlot::zeroed();
    slot.set(&[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(slot.bytes(), &[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(slot.as_bytes().len(), 27);
    assert_eq!(slot.as_bytes()[0], 4); // len byte leads the record
}

#[test]
fn input_slot_truncates_to_capacity() {
    let mut slot = InputSlot::zeroed();
    slot.set(&[0xaa; 40]);
    assert_eq!(slot.bytes().len(), INSN_MAXLEN);
}

#[test]
fn output_slot_emitted_bytes_truncate_to_len() {
    let mut out = OutputSlot::zeroed();
    out.fill(DecodeStatus::Success, 3, b"nop");

    let bytes = out.emitted_bytes();
    assert_eq!(bytes.len(), OUTPUT_HEADER_LEN + 3);
    assert_eq!(&bytes[0..4], &1u32.to_le_bytes()); // status
    assert_eq!(&bytes[4..6], &3u16.to_le_bytes()); // ndecoded
    assert_eq!(&bytes[6..8], &3u16.to_le_bytes()); // len
    assert_eq!(&bytes[8..], b"nop");
}

#[test]
fn output_slot_clamps_rogue_len() {
    // A plug-in that writes a nonsense len must not drag the emitter past
    // the result buffer.
    let mut out = OutputSlot::zeroed();
    out.len = u16::MAX;
    assert_eq!(out.emitted_bytes().len(), OUTPUT_HEADER_LEN + DEC_MAXLEN);
}

#[test]
fn reset_header_keeps_status() {
    let mut out = OutputSlot::zeroed();
    out.fill(DecodeStatus::Failure, 9, b"bad");
    out.reset_header();
    let (status, nd, len) = (out.status, out.ndecoded, out.len);
    assert_eq!(nd, 0);
    assert_eq!(len, 0);
    assert_eq!(status, DecodeStatus::Failure.as_u32());
}

#[test]
fn shared_map_zeroed_on_creation() {
    let ring: SharedMap<OutputChunk> = SharedMap::new(2).expect("map");
    assert_eq!(ring.len(), 2);
    for idx in 0..2 {
        let chunk = ring.get(idx);
        assert_eq!(chunk.remaining.load(), 0);
        let status = chunk.output(0).status;
        assert_eq!(status, 0);
    }
}

#[cfg(unix)]
#[test]
fn shared_map_visible_across_fork() {
    let ring: SharedMap<OutputChunk> = SharedMap::new(1).expect("map");

    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        // Child: write through the shared pages and exit without touching
        // the test harness.
        let chunk = ring.get(0);
        unsafe {
            let out = chunk.output_mut(0);
            out.fill(DecodeStatus::Crash, 0, b"from child");
        }
        chunk.remaining.store(42);
        unsafe { libc::_exit(0) };
    }

    let mut status = 0;
    let reaped = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(reaped, pid);

    let chunk = ring.get(0);
    assert_eq!(chunk.remaining.load(), 42);
    let status = chunk.output(0).status;
    assert_eq!(status, DecodeStatus::Crash.as_u32());
    assert_eq!(&chunk.output(0).result[..10], b"from child");
}
