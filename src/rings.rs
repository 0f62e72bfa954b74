// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// The chunk transport: one shared input ring (dispatcher-written, read by
// every worker) and one output ring per worker. Rings live in anonymous
// MAP_SHARED pages so the same virtual layout is visible on both sides of
// fork(), and are allocated once for the life of the process.

use std::cell::UnsafeCell;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::atomic_wait::WaitableU32;
use crate::error::{Error, Result};
use crate::slots::{InputSlot, OutputSlot};

/// Ring depth: chunks in flight between the dispatcher and the workers.
pub const NUM_CHUNKS: usize = 16;

/// Candidate slots per chunk.
pub const SLOTS_PER_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// One slot of the input ring.
///
/// Publication protocol: the dispatcher finalizes `input_count`, sets
/// `remaining_workers` to the worker count, and stores `generation` last.
/// Workers block on `generation`; its store is therefore the release point
/// for everything else in the chunk.
#[repr(C)]
pub struct InputChunk {
    pub generation: WaitableU32,
    pub remaining_workers: WaitableU32,
    input_count: UnsafeCell<u32>,
    inputs: UnsafeCell<[InputSlot; SLOTS_PER_CHUNK]>,
}

// The non-atomic fields are governed by the generation handshake.
unsafe impl Sync for InputChunk {}

impl InputChunk {
    #[inline]
    pub fn input_count(&self) -> u32 {
        unsafe { *self.input_count.get() }
    }

    /// # Safety
    /// Caller must be the single producer and the chunk must be quiescent:
    /// `remaining_workers` has reached 0 and the new generation is not yet
    /// published.
    #[inline]
    pub unsafe fn set_input_count(&self, count: u32) {
        *self.input_count.get() = count;
    }

    #[inline]
    pub fn input(&self, i: usize) -> &InputSlot {
        unsafe { &(*self.inputs.get())[i] }
    }

    /// # Safety
    /// Same contract as [`set_input_count`](Self::set_input_count).
    #[inline]
    pub unsafe fn input_mut(&self, i: usize) -> &mut InputSlot {
        &mut (*self.inputs.get())[i]
    }
}

/// One slot of a worker's output ring.
///
/// `remaining` is the resume cursor: published as the number of slots still
/// to process before the worker touches the chunk, stored down to
/// `input_count - i - 1` after each slot. The post-slot store is the commit;
/// the crash monitor reads it asynchronously to find the first uncommitted
/// slot.
#[repr(C)]
pub struct OutputChunk {
    pub remaining: WaitableU32,
    outputs: UnsafeCell<[OutputSlot; SLOTS_PER_CHUNK]>,
}

unsafe impl Sync for OutputChunk {}

impl OutputChunk {
    #[inline]
    pub fn output(&self, i: usize) -> &OutputSlot {
        unsafe { &(*self.outputs.get())[i] }
    }

    /// # Safety
    /// Caller must be the worker that owns this output ring, and slot `i`
    /// must not yet be committed for the current generation.
    #[inline]
    pub unsafe fn output_mut(&self, i: usize) -> &mut OutputSlot {
        &mut (*self.outputs.get())[i]
    }

    /// Raw slot pointer, for the signal handler (which must not form
    /// references into memory a crashed worker was writing).
    #[inline]
    pub fn output_ptr(&self, i: usize) -> *mut OutputSlot {
        unsafe { (*self.outputs.get()).as_mut_ptr().add(i) }
    }
}

// ---------------------------------------------------------------------------
// SharedMap — anonymous shared mapping
// ---------------------------------------------------------------------------

/// Types whose all-zeroes bit pattern is a valid value. Fresh anonymous
/// pages come back zeroed from the kernel; this is what makes handing out
/// references into them sound.
pub unsafe trait Zeroable {}

unsafe impl Zeroable for InputChunk {}
unsafe impl Zeroable for OutputChunk {}

struct RawMapping {
    ptr: *mut libc::c_void,
    bytes: usize,
}

unsafe impl Send for RawMapping {}
unsafe impl Sync for RawMapping {}

impl Drop for RawMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.bytes);
        }
    }
}

/// A fixed-length array of `T` in anonymous `MAP_SHARED` pages.
///
/// Clones are cheap handles onto the same mapping; the pages are unmapped
/// when the last handle in this process drops. Children created with
/// `fork()` inherit the mapping at the same virtual address, which is what
/// lets the crash monitor interpret ring pointers recorded pre-fork.
pub struct SharedMap<T> {
    raw: Arc<RawMapping>,
    len: usize,
    _marker: PhantomData<T>,
}

unsafe impl<T: Sync> Send for SharedMap<T> {}
unsafe impl<T: Sync> Sync for SharedMap<T> {}

impl<T> Clone for SharedMap<T> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            len: self.len,
            _marker: PhantomData,
        }
    }
}

impl<T: Zeroable> SharedMap<T> {
    /// Map `len` zeroed elements of `T` as shared-anonymous pages.
    pub fn new(len: usize) -> Result<Self> {
        let bytes = len * std::mem::size_of::<T>();
        #[allow(unused_mut)]
        let mut flags = libc::MAP_SHARED | libc::MAP_ANONYMOUS;
        #[cfg(target_os = "linux")]
        {
            flags |= libc::MAP_POPULATE;
        }
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::ResourceExhausted {
                what: "shared ring mapping",
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self {
            raw: Arc::new(RawMapping { ptr, bytes }),
            len,
            _marker: PhantomData,
        })
    }
}

impl<T> SharedMap<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &T {
        assert!(idx < self.len);
        unsafe { &*(self.raw.ptr as *const T).add(idx) }
    }

    /// Base pointer, for the signal-handler registry.
    #[inline]
    pub fn base_ptr(&self) -> *mut T {
        self.raw.ptr as *mut T
    }
}
