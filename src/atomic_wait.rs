// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Futex-backed waitable word: a 32-bit atomic plus a waiter count.
// The spin-first wait keeps the hot path syscall-free; the waiter count
// lets notify() skip the wake syscall when nobody is parked.

use std::sync::atomic::{AtomicU32, Ordering};

/// Spin iterations before parking in the kernel.
const SPIN_LIMIT: usize = 10_000;

/// A 32-bit value that threads and processes can block on.
///
/// Lives inside shared-anonymous pages, so the same word coordinates the
/// dispatcher with workers across `fork()`. All value operations are
/// sequentially consistent; the waiter count is only a wake-skip hint and
/// stays relaxed.
#[repr(C)]
pub struct WaitableU32 {
    val: AtomicU32,
    waiters: AtomicU32,
}

impl WaitableU32 {
    pub const fn new(val: u32) -> Self {
        Self {
            val: AtomicU32::new(val),
            waiters: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn load(&self) -> u32 {
        self.val.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn store(&self, val: u32) {
        self.val.store(val, Ordering::SeqCst);
    }

    /// Returns the previous value.
    #[inline]
    pub fn fetch_add(&self, val: u32) -> u32 {
        self.val.fetch_add(val, Ordering::SeqCst)
    }

    /// Returns the previous value.
    #[inline]
    pub fn fetch_sub(&self, val: u32) -> u32 {
        self.val.fetch_sub(val, Ordering::SeqCst)
    }

    /// Block until a load would return `target`.
    ///
    /// Spins with a CPU pause hint for a few thousand iterations, then
    /// parks on the futex. The kernel re-checks that the value still equals
    /// the last observed one before sleeping, so a store between our load
    /// and the syscall cannot be missed.
    pub fn wait_until(&self, target: u32) {
        let mut spins = 0usize;
        loop {
            let old = self.val.load(Ordering::SeqCst);
            if old == target {
                return;
            }
            std::hint::spin_loop();
            spins += 1;
            if spins > SPIN_LIMIT {
                self.park(old);
            }
        }
    }

    /// Wake all parked waiters, if any.
    pub fn notify(&self) {
        #[cfg(target_os = "linux")]
        if self.waiters.load(Ordering::Relaxed) != 0 {
            unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    self.val.as_ptr(),
                    libc::FUTEX_WAKE,
                    i32::MAX,
                );
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn park(&self, old: u32) {
        self.waiters.fetch_add(1, Ordering::Relaxed);
        // Returns immediately with EAGAIN if the value already changed,
        // and with EINTR on any signal (the SIGCHLD handler relies on
        // this to get a parked dispatcher to re-observe the counter).
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.val.as_ptr(),
                libc::FUTEX_WAIT,
                old,
                std::ptr::null::<libc::timespec>(),
            );
        }
        self.waiters.fetch_sub(1, Ordering::Relaxed);
    }

    // Without a futex, degrade to yield-then-sleep backoff.
    #[cfg(not(target_os = "linux"))]
    fn park(&self, _old: u32) {
        std::thread::yield_now();
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}

impl Default for WaitableU32 {
    fn default() -> Self {
        Self::new(0)
    }
}
