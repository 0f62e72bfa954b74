// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// The worker loop: one decoder bound to the shared input ring and its own
// output ring, consuming chunks as the dispatcher publishes generations.

use crate::plugin::DecoderFactory;
use crate::rings::{InputChunk, OutputChunk, SharedMap, NUM_CHUNKS, SLOTS_PER_CHUNK};

/// Everything a worker incarnation needs. Cloned into worker threads, and
/// inherited across fork() in process mode (the ring handles point into
/// shared-anonymous pages, so both sides see the same chunks).
#[derive(Clone)]
pub struct WorkerTask {
    pub workerno: usize,
    /// Plug-in path as listed in the worker file; the emitter keys records
    /// on this string.
    pub soname: String,
    pub factory: DecoderFactory,
    pub input_ring: SharedMap<InputChunk>,
    pub output_ring: SharedMap<OutputChunk>,
}

/// Consume chunks starting at `(start_gen, start_idx)` until the dispatcher
/// signals end-of-stream with a short chunk.
///
/// A fresh worker starts with `remaining == 0` on its first chunk and
/// processes it from slot 0. A worker respawned after a crash finds the
/// `remaining` its predecessor left behind and resumes at the slot after
/// the one that killed it.
pub fn run(task: &WorkerTask, start_gen: u32, start_idx: usize) -> crate::error::Result<()> {
    let mut decoder = (task.factory)()?;
    log::debug!("worker {} ({}) up", task.workerno, decoder.name());

    let mut gen = start_gen;
    let mut idx = start_idx;
    loop {
        let ic = task.input_ring.get(idx);
        ic.generation.wait_until(gen);

        let oc = task.output_ring.get(idx);
        let input_count = ic.input_count() as usize;

        let old_remaining = oc.remaining.load() as usize;
        let start = if old_remaining == 0 {
            0
        } else {
            // Predecessor died on slot input_count - old_remaining; skip it.
            input_count - old_remaining + 1
        };
        oc.remaining.store((input_count - start) as u32);

        for i in start..input_count {
            // Safety: this worker is the sole writer of its output ring,
            // and slot i is uncommitted until the store below.
            let out = unsafe { oc.output_mut(i) };
            out.reset_header();
            decoder.decode(out, ic.input(i).bytes());
            // Commit. A plain store, not a read-modify-write: no one else
            // writes this word. It is atomic so the decode result above is
            // ordered before the cursor moves past slot i.
            oc.remaining.store((input_count - i - 1) as u32);
        }

        if ic.remaining_workers.fetch_sub(1) == 1 {
            ic.remaining_workers.notify();
        }

        // A short chunk is the end-of-stream signal.
        if input_count < SLOTS_PER_CHUNK {
            break;
        }

        idx += 1;
        if idx == NUM_CHUNKS {
            idx = 0;
            gen += 1;
        }
    }

    log::debug!("worker {} done", task.workerno);
    Ok(())
}
