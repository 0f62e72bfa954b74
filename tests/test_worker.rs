// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Worker-loop behavior against hand-published chunks: fresh runs, the
// crash-resume skip, and the monitor's crash-location scan.

mod common;

use std::sync::{Arc, Mutex};

use common::factory;
use decdiff::{
    monitor, worker, DecodeStatus, InputChunk, OutputChunk, SharedMap, WorkerTask, NUM_CHUNKS,
    SLOTS_PER_CHUNK,
};

/// A worker task whose decoder records the first byte of every candidate
/// it sees, then echoes it as a success.
fn recording_task() -> (WorkerTask, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let task = WorkerTask {
        workerno: 0,
        soname: "recorder.so".to_string(),
        factory: factory("recorder", move |out, raw| {
            seen2.lock().expect("seen").push(raw[0]);
            out.fill(DecodeStatus::Success, raw.len() as u16, raw);
        }),
        input_ring: SharedMap::new(NUM_CHUNKS).expect("input ring"),
        output_ring: SharedMap::new(NUM_CHUNKS).expect("output ring"),
    };
    (task, seen)
}

/// Fill chunk `idx` with single-byte candidates `0..count` and publish it.
fn publish(ring: &SharedMap<InputChunk>, idx: usize, count: usize, gen: u32, nworkers: u32) {
    let ic = ring.get(idx);
    for i in 0..count {
        unsafe { ic.input_mut(i).set(&[i as u8]) };
    }
    unsafe { ic.set_input_count(count as u32) };
    ic.remaining_workers.store(nworkers);
    ic.generation.store(gen);
    ic.generation.notify();
}

#[test]
fn processes_whole_chunk_from_slot_zero() {
    let (task, seen) = recording_task();
    publish(&task.input_ring, 0, 10, 1, 1);

    worker::run(&task, 1, 0).expect("worker run");

    assert_eq!(*seen.lock().expect("seen"), (0..10).collect::<Vec<u8>>());
    assert_eq!(task.output_ring.get(0).remaining.load(), 0);
    assert_eq!(task.input_ring.get(0).remaining_workers.load(), 0);
    for i in 0..10 {
        let out = task.output_ring.get(0).output(i);
        assert!(out.is_success());
        let nd = out.ndecoded;
        assert_eq!(nd, 1);
        assert_eq!(&out.result[..1], &[i as u8]);
    }
}

#[test]
fn resume_skips_the_offending_slot() {
    let (task, seen) = recording_task();
    publish(&task.input_ring, 0, 10, 1, 1);

    // Predecessor died decoding slot 6: it had committed 0..=5, so
    // remaining was 10 - 6 = 4. The crash monitor marked the slot.
    let oc = task.output_ring.get(0);
    oc.remaining.store(4);
    unsafe {
        (*oc.output_ptr(6)).status = DecodeStatus::Crash.as_u32();
    }

    worker::run(&task, 1, 0).expect("worker run");

    assert_eq!(*seen.lock().expect("seen"), vec![7, 8, 9]);
    assert_eq!(oc.remaining.load(), 0);
    let status = oc.output(6).status;
    assert_eq!(status, DecodeStatus::Crash.as_u32());
}

#[test]
fn resume_after_crash_on_last_slot_processes_nothing() {
    let (task, seen) = recording_task();
    publish(&task.input_ring, 0, 10, 1, 1);
    task.output_ring.get(0).remaining.store(1); // died on slot 9

    worker::run(&task, 1, 0).expect("worker run");

    assert!(seen.lock().expect("seen").is_empty());
    assert_eq!(task.output_ring.get(0).remaining.load(), 0);
    assert_eq!(task.input_ring.get(0).remaining_workers.load(), 0);
}

#[test]
fn empty_terminal_chunk_exits_cleanly() {
    let (task, seen) = recording_task();
    publish(&task.input_ring, 0, 0, 1, 1);

    worker::run(&task, 1, 0).expect("worker run");

    assert!(seen.lock().expect("seen").is_empty());
    assert_eq!(task.input_ring.get(0).remaining_workers.load(), 0);
}

#[test]
fn advances_to_the_next_chunk_after_a_full_one() {
    let (task, seen) = recording_task();
    publish(&task.input_ring, 0, SLOTS_PER_CHUNK, 1, 1);
    publish(&task.input_ring, 1, 2, 1, 1);

    worker::run(&task, 1, 0).expect("worker run");

    assert_eq!(seen.lock().expect("seen").len(), SLOTS_PER_CHUNK + 2);
    assert_eq!(task.input_ring.get(0).remaining_workers.load(), 0);
    assert_eq!(task.input_ring.get(1).remaining_workers.load(), 0);
    assert_eq!(task.output_ring.get(1).remaining.load(), 0);
}

#[test]
fn locate_crash_finds_uncommitted_slot() {
    let input_ring: SharedMap<InputChunk> = SharedMap::new(NUM_CHUNKS).expect("input ring");
    let output_ring: SharedMap<OutputChunk> = SharedMap::new(NUM_CHUNKS).expect("output ring");

    assert_eq!(monitor::locate_crash(&input_ring, &output_ring), None);

    unsafe { input_ring.get(2).set_input_count(100) };
    output_ring.get(2).remaining.store(5);
    assert_eq!(monitor::locate_crash(&input_ring, &output_ring), Some((2, 95)));
}
