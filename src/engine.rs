// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// The dispatcher: fills input chunks from the mutator, waits for every
// worker to quiesce on a chunk, filters and emits the previous lap's
// verdicts, and rolls the ring forward. It runs exactly one generation lap
// ahead of its own consumption: output for chunk idx is read while the
// workers chew on the generation published there afterwards.

use std::io::Write;
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::monitor;
use crate::plugin::DecoderFactory;
use crate::report::{self, FilterConfig};
use crate::rings::{InputChunk, SharedMap, NUM_CHUNKS, SLOTS_PER_CHUNK};
use crate::slots::{InputSlot, MAX_NWORKERS};
use crate::worker::{self, WorkerTask};

/// How workers are isolated from the dispatcher and from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Each decoder in its own child process; crashes are recovered.
    Process,
    /// Each decoder as a sibling thread; a crash takes the engine down.
    Thread,
}

/// One worker-list entry: the plug-in path (as emitted in records) and the
/// factory that builds its decoder inside the worker.
pub struct WorkerSpec {
    pub soname: String,
    pub factory: DecoderFactory,
}

pub struct Engine {
    mode: ExecMode,
    filter: FilterConfig,
    input_ring: SharedMap<InputChunk>,
    tasks: Vec<WorkerTask>,
    threads: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Allocate the rings and bind one worker per spec. Filter bounds are
    /// resolved here, once the worker count is known.
    pub fn new(specs: Vec<WorkerSpec>, mode: ExecMode, mut filter: FilterConfig) -> Result<Self> {
        if specs.is_empty() {
            return Err(Error::Usage("worker list is empty".into()));
        }
        if specs.len() > MAX_NWORKERS {
            return Err(Error::Usage(format!(
                "too many workers (max {MAX_NWORKERS})"
            )));
        }

        let input_ring = SharedMap::new(NUM_CHUNKS)?;
        let tasks = specs
            .into_iter()
            .enumerate()
            .map(|(workerno, spec)| {
                Ok(WorkerTask {
                    workerno,
                    soname: spec.soname,
                    factory: spec.factory,
                    input_ring: input_ring.clone(),
                    output_ring: SharedMap::new(NUM_CHUNKS)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        filter.resolve(tasks.len());

        Ok(Self {
            mode,
            filter,
            input_ring,
            tasks,
            threads: Vec::new(),
        })
    }

    pub fn tasks(&self) -> &[WorkerTask] {
        &self.tasks
    }

    /// Drive the full pipeline: spawn workers, dispatch candidates from
    /// `mutator` until it reports exhaustion, drain, and emit surviving
    /// records to `out`.
    pub fn run<W: Write>(
        &mut self,
        mutator: &mut dyn FnMut(&mut InputSlot) -> bool,
        out: &mut W,
    ) -> Result<()> {
        self.start_workers()?;
        self.dispatch(mutator, out)?;
        self.join_threads();
        Ok(())
    }

    fn start_workers(&mut self) -> Result<()> {
        match self.mode {
            ExecMode::Process => {
                // The registry must be complete before the handler can run,
                // and the handler installed before the first child exists.
                monitor::init(&self.input_ring, &self.tasks);
                monitor::install_sigchld()?;
                for task in &self.tasks {
                    monitor::spawn_process(task, 1, 0)?;
                }
            }
            ExecMode::Thread => {
                for task in &self.tasks {
                    let task = task.clone();
                    let handle = std::thread::Builder::new()
                        .name(format!("worker-{}", task.workerno))
                        .spawn(move || {
                            if let Err(e) = worker::run(&task, 1, 0) {
                                log::error!("worker {}: {e}", task.workerno);
                            }
                        })
                        .map_err(|e| Error::ResourceExhausted {
                            what: "worker thread",
                            source: e,
                        })?;
                    self.threads.push(handle);
                }
            }
        }
        Ok(())
    }

    fn dispatch<W: Write>(
        &self,
        mutator: &mut dyn FnMut(&mut InputSlot) -> bool,
        out: &mut W,
    ) -> Result<()> {
        let nworkers = self.tasks.len() as u32;
        let mut idx = 0usize;
        let mut gen: u32 = 1;
        let mut exit_idx: Option<usize> = None;

        loop {
            let ic = self.input_ring.get(idx);
            ic.remaining_workers.wait_until(0);

            if self.mode == ExecMode::Process {
                let mut restarted = false;
                for w in 0..self.tasks.len() {
                    if let Some((start_gen, start_idx)) = monitor::take_restart(w) {
                        // Undo the handler's forced decrement; the fresh
                        // worker's own decrement takes its place.
                        self.input_ring.get(start_idx).remaining_workers.fetch_add(1);
                        log::warn!(
                            "worker {w} ({}) crashed; respawning at chunk {start_idx} \
                             generation {start_gen}",
                            self.tasks[w].soname
                        );
                        monitor::spawn_process(&self.tasks[w], start_gen, start_idx)?;
                        restarted = true;
                    }
                }
                if restarted {
                    // A restart may have been for the chunk we are on;
                    // wait for it again.
                    continue;
                }
            }

            // Consume the output the workers produced during the previous
            // traversal of this chunk. On the first lap there is none.
            if gen > 1 {
                let count = ic.input_count() as usize;
                for slot in 0..count {
                    report::process_slot(out, idx, slot, &self.input_ring, &self.tasks, &self.filter)
                        .map_err(|e| Error::io("output stream", e))?;
                }
            }

            if exit_idx == Some(idx) {
                break;
            }

            if exit_idx.is_none() {
                let mut count = 0u32;
                for i in 0..SLOTS_PER_CHUNK {
                    // Safety: single producer; the chunk is quiescent and
                    // its next generation is not yet published.
                    let slot = unsafe { ic.input_mut(i) };
                    if mutator(slot) {
                        count += 1;
                    } else {
                        exit_idx = Some(idx);
                        break;
                    }
                }
                unsafe { ic.set_input_count(count) };
                ic.remaining_workers.store(nworkers);
                // Workers block on `generation`, so it must be published
                // after input_count and remaining_workers.
                ic.generation.store(gen);
                ic.generation.notify();
            }

            idx += 1;
            if idx == NUM_CHUNKS {
                idx = 0;
                gen += 1;
            }
        }

        out.flush().map_err(|e| Error::io("output stream", e))
    }

    fn join_threads(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("worker thread panicked");
            }
        }
    }
}
