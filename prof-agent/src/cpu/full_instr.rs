//! # Full instrumentation CPU profiling
//!
//! Every instrumented method reports its entry and exit. Only calls inside a
//! root (or marker) subtree are recorded:
//!
//! ```text
//! root_method_entry(R)      ROOT_ENTRY R     depth 1, root depth 1
//!   method_entry(A)         METHOD_ENTRY A   depth 2
//!     method_entry(B)       METHOD_ENTRY B   depth 3
//!     method_exit(B)        METHOD_EXIT B    depth 2
//!   method_exit(A)          METHOD_EXIT A    depth 1
//! method_exit(R)            ROOT_EXIT R      depth 0, subtree closed
//! ```
//!
//! Each entry point has an `*_on` form taking the thread explicitly; the
//! plain form acts for the calling thread.

use std::sync::Arc;

use prof_agent_common::{Event, EventTag};

use super::blocking::{BlockingHooks, BlockingKind};
use crate::domain::MethodId;
use crate::runtime::ProfilerRuntime;
use crate::threads::{ThreadRecord, ThreadToken};

#[derive(Debug, Clone)]
pub struct CpuFullInstr {
    runtime: Arc<ProfilerRuntime>,
}

impl CpuFullInstr {
    #[must_use]
    pub fn new(runtime: Arc<ProfilerRuntime>) -> Self {
        Self { runtime }
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<ProfilerRuntime> {
        &self.runtime
    }

    // ========================================================================
    // Calling-thread entry points
    // ========================================================================

    pub fn root_method_entry(&self, method: impl Into<MethodId>) {
        let method = method.into();
        ThreadToken::with_current(|t| self.root_method_entry_on(t, method));
    }

    pub fn method_entry(&self, method: impl Into<MethodId>) {
        let method = method.into();
        ThreadToken::with_current(|t| self.method_entry_on(t, method));
    }

    pub fn method_exit(&self, method: impl Into<MethodId>) {
        let method = method.into();
        ThreadToken::with_current(|t| self.method_exit_on(t, method));
    }

    pub fn marker_method_entry(&self, method: impl Into<MethodId>) {
        let method = method.into();
        ThreadToken::with_current(|t| self.marker_method_entry_on(t, method));
    }

    pub fn marker_method_exit(&self, method: impl Into<MethodId>) {
        let method = method.into();
        ThreadToken::with_current(|t| self.marker_method_exit_on(t, method));
    }

    // ========================================================================
    // Explicit-thread entry points
    // ========================================================================

    pub fn root_method_entry_on(&self, thread: &Arc<ThreadToken>, method: MethodId) {
        let record = self.runtime.record_for(thread);
        if record.in_runtime() {
            return;
        }

        if record.is_initialized() {
            if record.in_call_graph() {
                if record.lock_state().root_method_stack_depth > 0 {
                    // Root called from inside an active root subtree
                    self.enter_method(&record, method);
                    return;
                }
            } else if record.lock_state().stack_depth > 0 {
                record.set_in_call_graph(true);
                self.enter_method(&record, method);
                record.set_in_call_graph(false);
                return;
            }
        }

        if !self.runtime.admit_thread(&record, thread) {
            return;
        }
        let _guard = record.enter_runtime();
        self.runtime.mark_first_invocation(&record, method);

        let mut state = record.lock_state();
        record.set_in_call_graph(true);
        self.runtime.write_method_event(&record, &mut state, EventTag::RootEntry, method);
        state.stack_depth += 1;
        state.root_method_stack_depth = state.stack_depth;
    }

    pub fn method_entry_on(&self, thread: &Arc<ThreadToken>, method: MethodId) {
        let record = self.runtime.record_for(thread);
        if record.in_runtime() {
            return;
        }
        self.enter_method(&record, method);
    }

    pub fn method_exit_on(&self, thread: &Arc<ThreadToken>, method: MethodId) {
        let record = self.runtime.record_for(thread);
        if record.in_runtime() || !record.in_call_graph() {
            return;
        }
        let _guard = record.enter_runtime();

        let mut state = record.lock_state();
        if state.stack_depth < 1 {
            return;
        }
        state.stack_depth -= 1;
        let closes_root =
            state.root_method_stack_depth > 0 && state.stack_depth < state.root_method_stack_depth;
        let tag = if closes_root { EventTag::RootExit } else { EventTag::MethodExit };
        self.runtime.write_method_event(&record, &mut state, tag, method);

        if closes_root {
            state.root_method_stack_depth = 0;
        }
        if state.stack_depth < 1 {
            state.root_method_stack_depth = 0;
            record.set_in_call_graph(false);
        }
    }

    pub fn marker_method_entry_on(&self, thread: &Arc<ThreadToken>, method: MethodId) {
        let record = self.runtime.record_for(thread);
        if record.in_runtime() {
            return;
        }
        let nested = record.is_initialized() && record.in_call_graph();
        if !nested && !self.runtime.admit_thread(&record, thread) {
            return;
        }
        let _guard = record.enter_runtime();
        self.runtime.mark_first_invocation(&record, method);

        let mut state = record.lock_state();
        record.set_in_call_graph(true);
        self.runtime.write_method_event(&record, &mut state, EventTag::MarkerEntry, method);
        state.stack_depth += 1;
    }

    pub fn marker_method_exit_on(&self, thread: &Arc<ThreadToken>, method: MethodId) {
        let record = self.runtime.record_for(thread);
        if record.in_runtime() || !record.in_call_graph() {
            return;
        }
        let _guard = record.enter_runtime();

        let mut state = record.lock_state();
        if state.stack_depth < 1 {
            return;
        }
        state.stack_depth -= 1;
        self.runtime.write_method_event(&record, &mut state, EventTag::MarkerExit, method);
        if state.stack_depth < 1 {
            state.root_method_stack_depth = 0;
            record.set_in_call_graph(false);
        }
    }

    // ========================================================================
    // Collector control
    // ========================================================================

    pub fn suspend_active_timers(&self) {
        self.runtime.suspend_active_timers();
    }

    pub fn resume_active_timers(&self) {
        self.runtime.resume_active_timers();
    }

    /// Current call depth of `thread` (0 outside any subtree)
    #[must_use]
    pub fn stack_depth(&self, thread: &Arc<ThreadToken>) -> i32 {
        let Some(record) = self.runtime.registry().get(thread) else {
            return 0;
        };
        let depth = record.lock_state().stack_depth;
        depth
    }

    fn enter_method(&self, record: &ThreadRecord, method: MethodId) {
        if !record.in_call_graph() {
            return;
        }
        let _guard = record.enter_runtime();
        self.runtime.mark_first_invocation(record, method);

        let mut state = record.lock_state();
        if state.stack_depth < 1 {
            return;
        }
        self.runtime.write_method_event(record, &mut state, EventTag::MethodEntry, method);
        state.stack_depth += 1;
    }

    fn blocking_event(&self, thread: &Arc<ThreadToken>, tag: EventTag, entering: bool) {
        let Some(record) = self.runtime.registry().get(thread) else {
            return;
        };
        if record.in_runtime() || !record.in_call_graph() {
            return;
        }
        let _guard = record.enter_runtime();

        let mut state = record.lock_state();
        let timestamp = self.runtime.now();
        state.last_wait_start_time = if entering { timestamp } else { 0 };
        self.runtime.write_local(&record, &mut state, &Event::Timestamp { tag, timestamp });
    }
}

impl BlockingHooks for CpuFullInstr {
    fn blocking_entry_on(&self, thread: &Arc<ThreadToken>, kind: BlockingKind) {
        self.blocking_event(thread, kind.entry_tag(), true);
    }

    fn blocking_exit_on(&self, thread: &Arc<ThreadToken>, kind: BlockingKind) {
        self.blocking_event(thread, kind.exit_tag(), false);
    }
}
