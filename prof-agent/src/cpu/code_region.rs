//! # Code region CPU profiling
//!
//! Measures the wall time of one instrumented region per thread, minus the
//! time the thread spent blocked inside it. Completed measurements go into a
//! fixed-size ring; the oldest are overwritten once it is full.

use parking_lot::Mutex;
use std::sync::Arc;

use super::blocking::{BlockingHooks, BlockingKind};
use crate::runtime::ProfilerRuntime;
use crate::threads::ThreadToken;

#[derive(Debug)]
struct RegionResults {
    ring: Vec<u64>,
    capacity: usize,
    next: usize,
    invocations: u64,
}

impl RegionResults {
    fn new(capacity: usize) -> Self {
        Self { ring: Vec::with_capacity(capacity), capacity, next: 0, invocations: 0 }
    }

    fn push(&mut self, duration: u64) {
        if self.ring.len() < self.capacity {
            self.ring.push(duration);
        } else {
            self.ring[self.next] = duration;
        }
        self.next = (self.next + 1) % self.capacity;
        self.invocations += 1;
    }

    /// Stored durations, oldest first
    fn ordered(&self) -> impl Iterator<Item = u64> + '_ {
        let split = if self.ring.len() < self.capacity { 0 } else { self.next };
        self.ring[split..].iter().chain(&self.ring[..split]).copied()
    }
}

#[derive(Debug)]
pub struct CpuCodeRegion {
    runtime: Arc<ProfilerRuntime>,
    results: Mutex<RegionResults>,
}

impl CpuCodeRegion {
    #[must_use]
    pub fn new(runtime: Arc<ProfilerRuntime>) -> Self {
        let capacity = runtime.config().code_region_buffer_size.max(1);
        Self { runtime, results: Mutex::new(RegionResults::new(capacity)) }
    }

    pub fn code_region_entry(&self) {
        ThreadToken::with_current(|t| self.code_region_entry_on(t));
    }

    pub fn code_region_exit(&self) {
        ThreadToken::with_current(|t| self.code_region_exit_on(t));
    }

    pub fn code_region_entry_on(&self, thread: &Arc<ThreadToken>) {
        if self.runtime.server_threads().is_server_thread(thread) {
            return;
        }
        let record = self.runtime.record_for(thread);
        if record.in_runtime() || record.in_call_graph() {
            return;
        }
        let mut state = record.lock_state();
        record.set_in_call_graph(true);
        state.last_wait_start_time = 0;
        state.abs_entry_time = self.runtime.now();
    }

    pub fn code_region_exit_on(&self, thread: &Arc<ThreadToken>) {
        let Some(record) = self.runtime.registry().get(thread) else {
            return;
        };
        if record.in_runtime() || !record.in_call_graph() {
            return;
        }
        let now = self.runtime.now();
        let duration = {
            let state = record.lock_state();
            now.saturating_sub(state.abs_entry_time)
        };
        record.set_in_call_graph(false);
        self.results.lock().push(duration);
    }

    /// `[invocation count, oldest duration, ..., newest duration]`
    #[must_use]
    pub fn profiling_results(&self) -> Vec<u64> {
        let results = self.results.lock();
        std::iter::once(results.invocations).chain(results.ordered()).collect()
    }

    pub fn reset(&self) {
        let mut results = self.results.lock();
        let capacity = results.capacity;
        *results = RegionResults::new(capacity);
    }
}

impl BlockingHooks for CpuCodeRegion {
    fn blocking_entry_on(&self, thread: &Arc<ThreadToken>, _kind: BlockingKind) {
        let Some(record) = self.runtime.registry().get(thread) else {
            return;
        };
        if !record.in_call_graph() {
            return;
        }
        record.lock_state().last_wait_start_time = self.runtime.now();
    }

    /// Blocked time is moved out of the measured region
    fn blocking_exit_on(&self, thread: &Arc<ThreadToken>, _kind: BlockingKind) {
        let Some(record) = self.runtime.registry().get(thread) else {
            return;
        };
        if !record.in_call_graph() {
            return;
        }
        let now = self.runtime.now();
        let mut state = record.lock_state();
        if state.last_wait_start_time > 0 {
            state.abs_entry_time += now.saturating_sub(state.last_wait_start_time);
            state.last_wait_start_time = 0;
        }
    }
}
