//! Per-thread profiling state
//!
//! Fields touched by other threads (the reentrancy counter raised by
//! suspend/resume, the call-graph flag read by it, the identity compared by
//! table probes) are atomics. Everything else sits in a [`ThreadState`]
//! behind a mutex that is in practice only contended during dumps and
//! dead-thread sweeps.

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::ThreadToken;
use crate::buffer::EventBuffer;
use crate::domain::ThreadId;

/// Mutable state owned by the record's thread
#[derive(Debug, Default)]
pub struct ThreadState {
    /// Logical depth relative to the outermost root/marker frame
    pub stack_depth: i32,
    /// Depth at which the active root was entered (0 when no root is active)
    pub root_method_stack_depth: i32,
    /// Start of the current measured region, shifted forward by blocked time
    pub abs_entry_time: u64,
    /// Start of the blocking call in progress (0 when not blocked)
    pub last_wait_start_time: u64,
    /// When the record was initialized
    pub thread_entry_time: u64,
    /// Local event buffer, allocated on first use
    pub ev_buf: Option<EventBuffer>,
}

#[derive(Debug)]
pub struct ThreadRecord {
    thread_id: ThreadId,
    hash: u32,
    token_addr: AtomicUsize,
    thread: Mutex<Weak<ThreadToken>>,
    in_profiling_runtime_method: AtomicI32,
    in_call_graph: AtomicBool,
    initialized: AtomicBool,
    admitted: AtomicBool,
    timers_suspended: AtomicBool,
    state: Mutex<ThreadState>,
}

/// Keeps the owning record's reentrancy counter raised while alive
pub struct RuntimeGuard<'a> {
    record: &'a ThreadRecord,
}

impl Drop for RuntimeGuard<'_> {
    fn drop(&mut self) {
        self.record.in_profiling_runtime_method.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ThreadRecord {
    pub(crate) fn new(thread_id: ThreadId, token: &Arc<ThreadToken>) -> Self {
        Self {
            thread_id,
            hash: token.identity_hash(),
            token_addr: AtomicUsize::new(Arc::as_ptr(token) as usize),
            thread: Mutex::new(Arc::downgrade(token)),
            in_profiling_runtime_method: AtomicI32::new(0),
            in_call_graph: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            admitted: AtomicBool::new(false),
            timers_suspended: AtomicBool::new(false),
            state: Mutex::new(ThreadState::default()),
        }
    }

    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub(crate) fn hash(&self) -> u32 {
        self.hash
    }

    /// Whether this record belongs to `token`
    #[must_use]
    pub fn is_thread(&self, token: &Arc<ThreadToken>) -> bool {
        self.token_addr.load(Ordering::Acquire) == Arc::as_ptr(token) as usize
    }

    /// The owning thread, if it is still alive
    #[must_use]
    pub fn thread(&self) -> Option<Arc<ThreadToken>> {
        self.thread.lock().upgrade()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.thread.lock().strong_count() > 0
    }

    /// Released records keep their slot until the next rehash but match no thread
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.token_addr.load(Ordering::Acquire) == 0
    }

    // ------------------------------------------------------------------------
    // Reentrancy guard
    // ------------------------------------------------------------------------

    /// True while profiler code runs on this thread or timers are suspended
    #[must_use]
    pub fn in_runtime(&self) -> bool {
        self.in_profiling_runtime_method.load(Ordering::Acquire) > 0
    }

    #[must_use]
    pub fn runtime_depth(&self) -> i32 {
        self.in_profiling_runtime_method.load(Ordering::Acquire)
    }

    /// Raise the reentrancy counter until the guard is dropped
    #[must_use]
    pub fn enter_runtime(&self) -> RuntimeGuard<'_> {
        self.in_profiling_runtime_method.fetch_add(1, Ordering::AcqRel);
        RuntimeGuard { record: self }
    }

    /// Raise the counter on behalf of suspend; paired with [`Self::lift_suspension`]
    pub(crate) fn impose_suspension(&self) -> bool {
        if self.timers_suspended.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.in_profiling_runtime_method.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub(crate) fn lift_suspension(&self) {
        if self.timers_suspended.swap(false, Ordering::AcqRel) {
            self.in_profiling_runtime_method.fetch_sub(1, Ordering::AcqRel);
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle flags
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn in_call_graph(&self) -> bool {
        self.in_call_graph.load(Ordering::Acquire)
    }

    pub fn set_in_call_graph(&self, value: bool) {
        self.in_call_graph.store(value, Ordering::Release);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether the record counts against the profiled-thread cap
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire)
    }

    pub(crate) fn set_admitted(&self, value: bool) -> bool {
        self.admitted.swap(value, Ordering::AcqRel)
    }

    /// Mark the record active with fresh state
    pub fn initialize(&self, now: u64, local_buffer: Option<usize>) {
        let mut state = self.state.lock();
        *state = ThreadState {
            thread_entry_time: now,
            ev_buf: local_buffer.map(EventBuffer::with_capacity),
            ..ThreadState::default()
        };
        self.in_call_graph.store(false, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
    }

    /// Return the record to its never-used state (collector reset)
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = ThreadState::default();
        self.in_call_graph.store(false, Ordering::Release);
        self.initialized.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn lock_state(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock()
    }

    /// Detach from the dead thread and hand back the local buffer
    pub(crate) fn release(&self) -> Option<EventBuffer> {
        self.token_addr.store(0, Ordering::Release);
        *self.thread.lock() = Weak::new();
        let mut state = self.state.lock();
        self.in_call_graph.store(false, Ordering::Release);
        self.initialized.store(false, Ordering::Release);
        state.ev_buf.take()
    }
}
