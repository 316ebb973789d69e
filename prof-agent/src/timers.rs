//! High-resolution timers
//!
//! Every timestamp the runtime writes comes from a [`Clock`]. Ticks are
//! nanoseconds. [`MonotonicClock`] reads the OS clocks, [`ManualClock`] gives
//! tests full control over time.

#![allow(unsafe_code)] // clock_gettime() requires unsafe

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of absolute and per-thread CPU timestamps
pub trait Clock: Send + Sync {
    /// Monotonic absolute time in ticks
    fn now(&self) -> u64;

    /// CPU time consumed by the calling thread, in ticks
    fn thread_cpu_time(&self) -> u64;
}

/// OS monotonic clock (`CLOCK_MONOTONIC` / `CLOCK_THREAD_CPUTIME_ID`)
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

#[allow(clippy::cast_sign_loss)]
fn read_clock(clock_id: libc::clockid_t) -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: ts is a valid, writable timespec
    let rc = unsafe { libc::clock_gettime(clock_id, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        read_clock(libc::CLOCK_MONOTONIC)
    }

    fn thread_cpu_time(&self) -> u64 {
        read_clock(libc::CLOCK_THREAD_CPUTIME_ID)
    }
}

/// Deterministic clock: every read returns the current value and then
/// advances it by `step`
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    step: u64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: u64, step: u64) -> Self {
        Self { now: AtomicU64::new(start), step }
    }

    /// Move the clock forward without reading it
    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Current value without advancing
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }

    fn thread_cpu_time(&self) -> u64 {
        self.now.load(Ordering::SeqCst) / 2
    }
}
