// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Process-mode isolation: fork-based worker spawning and the SIGCHLD crash
// monitor. The handler runs in a constrained context — no allocation, no
// locks, no reentrancy hazards — so everything it needs lives in a static
// registry of atomics and raw ring pointers, populated before the handler
// is installed. Respawning happens later, in the dispatcher's restart
// sweep, never in the handler itself.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::rings::{InputChunk, OutputChunk, SharedMap, NUM_CHUNKS};
use crate::slots::{DecodeStatus, MAX_NWORKERS};
use crate::worker::{self, WorkerTask};

// ---------------------------------------------------------------------------
// Registry shared with the signal handler
// ---------------------------------------------------------------------------

struct Registry {
    nworkers: AtomicUsize,
    input_ring: AtomicPtr<InputChunk>,
    output_rings: [AtomicPtr<OutputChunk>; MAX_NWORKERS],
    pids: [AtomicI32; MAX_NWORKERS],
    sigchld: [AtomicBool; MAX_NWORKERS],
    start_gen: [AtomicU32; MAX_NWORKERS],
    start_idx: [AtomicUsize; MAX_NWORKERS],
}

static REGISTRY: Registry = Registry {
    nworkers: AtomicUsize::new(0),
    input_ring: AtomicPtr::new(std::ptr::null_mut()),
    output_rings: [const { AtomicPtr::new(std::ptr::null_mut()) }; MAX_NWORKERS],
    pids: [const { AtomicI32::new(0) }; MAX_NWORKERS],
    sigchld: [const { AtomicBool::new(false) }; MAX_NWORKERS],
    start_gen: [const { AtomicU32::new(0) }; MAX_NWORKERS],
    start_idx: [const { AtomicUsize::new(0) }; MAX_NWORKERS],
};

/// Record the ring locations the handler will scan. Must run before
/// [`install_sigchld`].
pub fn init(input_ring: &SharedMap<InputChunk>, tasks: &[WorkerTask]) {
    REGISTRY
        .input_ring
        .store(input_ring.base_ptr(), Ordering::SeqCst);
    for task in tasks {
        REGISTRY.output_rings[task.workerno].store(task.output_ring.base_ptr(), Ordering::SeqCst);
    }
    REGISTRY.nworkers.store(tasks.len(), Ordering::SeqCst);
}

/// Install the SIGCHLD handler (`SA_NOCLDSTOP`: only terminations, not
/// stops).
pub fn install_sigchld() -> Result<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigchld_handler as *const () as libc::sighandler_t;
        sa.sa_flags = libc::SA_NOCLDSTOP;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(libc::SIGCHLD, &sa, std::ptr::null_mut()) != 0 {
            return Err(Error::ResourceExhausted {
                what: "installing SIGCHLD handler",
                source: io::Error::last_os_error(),
            });
        }
    }
    Ok(())
}

/// If `workerno` died mid-chunk since the last sweep, clear its flag and
/// return the resume cursor its replacement should start from.
pub fn take_restart(workerno: usize) -> Option<(u32, usize)> {
    if REGISTRY.sigchld[workerno].swap(false, Ordering::SeqCst) {
        Some((
            REGISTRY.start_gen[workerno].load(Ordering::SeqCst),
            REGISTRY.start_idx[workerno].load(Ordering::SeqCst),
        ))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Fork a worker process running `task` from `(start_gen, start_idx)`.
///
/// The pipe handshake keeps the child parked until the parent has recorded
/// its pid, so a crash arriving immediately after exec of the worker loop
/// can always be attributed. The child asks the kernel for SIGHUP on parent
/// death, so orphans self-terminate.
pub fn spawn_process(task: &WorkerTask, start_gen: u32, start_idx: usize) -> Result<()> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(Error::ResourceExhausted {
            what: "worker pipe",
            source: io::Error::last_os_error(),
        });
    }

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let source = io::Error::last_os_error();
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
        return Err(Error::ResourceExhausted {
            what: "fork",
            source,
        });
    }

    if pid == 0 {
        // Child.
        #[cfg(target_os = "linux")]
        unsafe {
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGHUP);
        }
        let mut byte = 0u8;
        unsafe {
            libc::close(fds[1]);
            if libc::read(fds[0], &mut byte as *mut u8 as *mut libc::c_void, 1) != 1 {
                // Parent died before recording our pid and we were not
                // reparented in time for SIGHUP.
                libc::_exit(1);
            }
            libc::close(fds[0]);
        }
        let code = match worker::run(task, start_gen, start_idx) {
            Ok(()) => 0,
            Err(e) => {
                log::error!("worker {}: {e}", task.workerno);
                1
            }
        };
        unsafe { libc::_exit(code) };
    }

    // Parent: publish the pid, then release the child.
    REGISTRY.pids[task.workerno].store(pid, Ordering::SeqCst);
    let byte = 0u8;
    unsafe {
        libc::close(fds[0]);
        libc::write(fds[1], &byte as *const u8 as *const libc::c_void, 1);
        libc::close(fds[1]);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Crash location
// ---------------------------------------------------------------------------

/// Scan one worker's output ring for the chunk it died in: the first chunk
/// in ring order with uncommitted slots. Returns `(chunk index, slot)` of
/// the offending input, or `None` if the worker was not mid-decode.
pub fn locate_crash(
    input_ring: &SharedMap<InputChunk>,
    output_ring: &SharedMap<OutputChunk>,
) -> Option<(usize, usize)> {
    unsafe { scan_rings(input_ring.base_ptr(), output_ring.base_ptr()) }
}

/// # Safety
/// Both pointers must address `NUM_CHUNKS` live chunks.
unsafe fn scan_rings(
    input: *const InputChunk,
    output: *const OutputChunk,
) -> Option<(usize, usize)> {
    for widx in 0..NUM_CHUNKS {
        let remaining = (*output.add(widx)).remaining.load();
        if remaining == 0 {
            continue;
        }
        let slot = (*input.add(widx)).input_count() as usize - remaining as usize;
        return Some((widx, slot));
    }
    None
}

// ---------------------------------------------------------------------------
// SIGCHLD handler
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
use libc::__errno_location as errno_location;
#[cfg(all(unix, not(target_os = "linux")))]
use libc::__error as errno_location;

extern "C" fn sigchld_handler(_sig: libc::c_int) {
    unsafe {
        let errno = errno_location();
        let saved = *errno;

        // One signal may stand for several dead children; reap them all.
        let mut status: libc::c_int = 0;
        loop {
            let pid = libc::waitpid(-1, &mut status, libc::WNOHANG);
            if pid <= 0 {
                break;
            }
            handle_exit(pid);
        }

        *errno = saved;
    }
}

/// Async-signal-safe: atomics and raw stores only.
unsafe fn handle_exit(pid: libc::pid_t) {
    let nworkers = REGISTRY.nworkers.load(Ordering::SeqCst);
    let Some(workerno) =
        (0..nworkers).find(|&w| REGISTRY.pids[w].load(Ordering::SeqCst) == pid)
    else {
        return;
    };

    let input = REGISTRY.input_ring.load(Ordering::SeqCst) as *const InputChunk;
    let output = REGISTRY.output_rings[workerno].load(Ordering::SeqCst) as *const OutputChunk;
    if input.is_null() || output.is_null() {
        return;
    }

    // A worker that exited cleanly (or died outside decoding) has no
    // uncommitted slot anywhere; nothing to do.
    let Some((widx, slot)) = scan_rings(input, output) else {
        return;
    };

    let ic = &*input.add(widx);
    let oc = &*output.add(widx);
    (*oc.output_ptr(slot)).status = DecodeStatus::Crash.as_u32();

    REGISTRY.start_gen[workerno].store(ic.generation.load(), Ordering::SeqCst);
    REGISTRY.start_idx[workerno].store(widx, Ordering::SeqCst);
    REGISTRY.sigchld[workerno].store(true, Ordering::SeqCst);

    // Forced decrement: lets the dispatcher's pending wait complete without
    // the dead worker, and bounces any parked futex (the syscall restarts
    // and re-reads the counter). The restart sweep re-increments before
    // spawning the replacement, whose own decrement rebalances the count.
    ic.remaining_workers.fetch_sub(1);
}
