// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Filtering and record emission. The stream is a concatenation of
// little-endian records; boundaries are implicit in the embedded sizes:
//
//   nworkers: u32
//   input slot (27 bytes)
//   per worker, in worker order:
//     name_len: u64 | name bytes | output header (8 bytes) | result[..len]

use std::io::Write;

use crate::rings::{InputChunk, SharedMap};
use crate::slots::MAX_NWORKERS;
use crate::worker::WorkerTask;

/// Which slots survive to the triage stream.
///
/// By default everything at least one decoder accepted is kept; the
/// interesting configurations narrow the window (`min=1, max=N-1` keeps
/// only split verdicts) or add the decoded-length-mismatch predicate.
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    /// Keep a slot when the success count is at least this. Negative values
    /// count down from the worker count; resolved by [`resolve`](Self::resolve).
    pub min_success: i32,
    /// Upper bound of the success-count window, same convention.
    pub max_success: i32,
    /// Also keep slots where successful decoders disagree on how many bytes
    /// they consumed.
    pub ndecoded_mismatch: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_success: 1,
            max_success: MAX_NWORKERS as i32,
            ndecoded_mismatch: false,
        }
    }
}

impl FilterConfig {
    /// Rebase negative bounds once the worker count is known: `-1` means
    /// `nworkers`, `-2` means `nworkers - 1`, and so on.
    pub fn resolve(&mut self, nworkers: usize) {
        let n = nworkers as i32;
        if self.min_success < 0 {
            self.min_success += n + 1;
        }
        if self.max_success < 0 {
            self.max_success += n + 1;
        }
        log::info!(
            "filter min={} max={} ndecoded_mismatch={}",
            self.min_success,
            self.max_success,
            self.ndecoded_mismatch
        );
    }
}

/// Apply the filter to one (chunk, slot) position and emit the record if it
/// survives. Reads the same position from every worker's output ring.
pub fn process_slot<W: Write>(
    out: &mut W,
    chunk_idx: usize,
    slot_idx: usize,
    input_ring: &SharedMap<InputChunk>,
    tasks: &[WorkerTask],
    filter: &FilterConfig,
) -> std::io::Result<()> {
    let mut num_success: i32 = 0;
    let mut ndecoded_same = true;
    let mut last_ndecoded: i32 = -1;
    for task in tasks {
        let output = task.output_ring.get(chunk_idx).output(slot_idx);
        if output.is_success() {
            num_success += 1;
            let nd = output.ndecoded as i32;
            if last_ndecoded == -1 {
                last_ndecoded = nd;
            } else if last_ndecoded != nd {
                ndecoded_same = false;
            }
        }
    }

    let keep = (num_success >= filter.min_success && num_success <= filter.max_success)
        || (filter.ndecoded_mismatch && !ndecoded_same);
    if !keep {
        return Ok(());
    }

    out.write_all(&(tasks.len() as u32).to_le_bytes())?;
    out.write_all(input_ring.get(chunk_idx).input(slot_idx).as_bytes())?;
    for task in tasks {
        let name = task.soname.as_bytes();
        out.write_all(&(name.len() as u64).to_le_bytes())?;
        out.write_all(name)?;
        out.write_all(task.output_ring.get(chunk_idx).output(slot_idx).emitted_bytes())?;
    }
    Ok(())
}
