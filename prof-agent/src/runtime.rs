//! # Profiler runtime context
//!
//! [`ProfilerRuntime`] owns everything the instrumentation runtimes share:
//! configuration, clock, thread registry, the shared event buffer with its
//! [`EventBufferManager`], the first-invocation table and admission control.
//! Every subsystem receives it as an `Arc`, so independent instances can live
//! side by side (tests rely on this).
//!
//! ## Event flow
//!
//! ```text
//! callback ─► thread-local EventBuffer ──(full)──► shared EventBuffer ──(full)──► manager ─► consumer
//!                                       SET_FOLLOWING_EVENTS_THREAD header
//! ```
//!
//! ## Lock order
//!
//! record state → sink. The thread table lock is never taken while the sink
//! is held.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use prof_agent_common::{Event, EventTag};

use crate::buffer::{
    BufferConsumer, EventBuffer, EventBufferManager, NullConsumer, RemoteTransport, Transport,
};
use crate::config::RuntimeConfig;
use crate::domain::{AgentError, MethodId, ThreadId};
use crate::sampling::{ShadowStacks, StackWalker};
use crate::threads::{ServerThreads, ThreadRecord, ThreadRegistry, ThreadState, ThreadToken};
use crate::timers::{Clock, MonotonicClock};

// ============================================================================
// External collaborators
// ============================================================================

/// Callbacks into the instrumentor
pub trait ExternalActions: Send + Sync {
    /// First call of `method` anywhere in the process
    fn handle_first_time_method_invoke(&self, method: MethodId);
}

/// Logs first invocations and does nothing else
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingActions;

impl ExternalActions for LoggingActions {
    fn handle_first_time_method_invoke(&self, method: MethodId) {
        log::debug!("First invocation of {method}");
    }
}

// ============================================================================
// Shared buffer
// ============================================================================

/// Shared event buffer and the manager that drains it
#[derive(Debug)]
pub struct EventSink {
    buffer: EventBuffer,
    manager: EventBufferManager,
    /// Thread the events at the end of `buffer` belong to
    current_thread: Option<ThreadId>,
}

const THREAD_SWITCH_LEN: usize = 3;

impl EventSink {
    fn new(capacity: usize, manager: EventBufferManager) -> Self {
        Self { buffer: EventBuffer::with_capacity(capacity), manager, current_thread: None }
    }

    /// Append an event, attributing it to `thread` when given
    pub fn write(&mut self, thread: Option<ThreadId>, event: &Event<'_>) {
        let needed = self.switch_len(thread) + event.encoded_len();
        if !self.buffer.fits(needed) {
            self.dump();
        }
        self.switch_to(thread);
        if !self.buffer.push(event) {
            log::error!(
                "{:?} event of {} bytes exceeds the shared buffer, dropped",
                event.tag(),
                event.encoded_len()
            );
        }
    }

    /// Append a flushed thread-local chunk behind a thread switch header
    pub fn write_chunk(&mut self, thread: ThreadId, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        if !self.buffer.fits(self.switch_len(Some(thread)) + chunk.len()) {
            self.dump();
        }
        if self.buffer.fits(THREAD_SWITCH_LEN + chunk.len()) {
            self.switch_to(Some(thread));
            self.buffer.extend_raw(chunk);
            return;
        }

        // Larger than the whole shared buffer: hand it over on its own
        let mut direct = Vec::with_capacity(THREAD_SWITCH_LEN + chunk.len());
        Event::SetFollowingEventsThread { thread_id: thread.0 }.encode(&mut direct);
        direct.extend_from_slice(chunk);
        if let Err(e) = self.manager.event_buffer_dump_hook(&direct, 0, direct.len()) {
            log::error!("Dropped {} bytes of {thread} events: {e}", chunk.len());
        }
    }

    /// Hand everything not yet dumped to the manager and start over
    pub fn dump(&mut self) {
        if self.buffer.has_pending() {
            let (start, end) = (self.buffer.dump_last_pos(), self.buffer.len());
            if let Err(e) = self.manager.event_buffer_dump_hook(self.buffer.as_bytes(), start, end) {
                log::error!("Dropped {} bytes of events: {e}", end - start);
            }
        }
        self.buffer.clear();
        self.current_thread = None;
    }

    /// Drop buffered events without dumping them
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.current_thread = None;
    }

    #[must_use]
    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    #[must_use]
    pub fn manager(&self) -> &EventBufferManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut EventBufferManager {
        &mut self.manager
    }

    fn switch_len(&self, thread: Option<ThreadId>) -> usize {
        match thread {
            Some(t) if self.current_thread != Some(t) => THREAD_SWITCH_LEN,
            _ => 0,
        }
    }

    fn switch_to(&mut self, thread: Option<ThreadId>) {
        if let Some(t) = thread {
            if self.current_thread != Some(t) {
                self.buffer.push(&Event::SetFollowingEventsThread { thread_id: t.0 });
                self.current_thread = Some(t);
            }
        }
    }
}

// ============================================================================
// Runtime
// ============================================================================

#[derive(Debug, Default)]
struct SuspendState {
    depth: u32,
    suspended: Vec<Arc<ThreadRecord>>,
}

pub struct ProfilerRuntime {
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    registry: ThreadRegistry,
    server_threads: Arc<ServerThreads>,
    sink: Mutex<EventSink>,
    actions: Arc<dyn ExternalActions>,
    stack_walker: Arc<dyn StackWalker>,
    instr_method_invoked: Box<[AtomicBool]>,
    profiled_threads_allowed: AtomicU32,
    profiled_threads: AtomicU32,
    instrumentation_enabled: AtomicBool,
    suspend: Mutex<SuspendState>,
    sampler_reset: AtomicBool,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for ProfilerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilerRuntime")
            .field("registry", &self.registry)
            .field("profiled_threads", &self.profiled_thread_count())
            .field("profiled_threads_allowed", &self.profiled_threads_allowed())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ProfilerRuntime`]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    consumer: Option<Box<dyn BufferConsumer>>,
    clock: Option<Arc<dyn Clock>>,
    stack_walker: Option<Arc<dyn StackWalker>>,
    actions: Option<Arc<dyn ExternalActions>>,
    remote: Option<Box<dyn RemoteTransport>>,
    server_threads: Option<Arc<ServerThreads>>,
}

impl RuntimeBuilder {
    #[must_use]
    pub fn consumer(mut self, consumer: impl BufferConsumer + 'static) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn stack_walker(mut self, walker: Arc<dyn StackWalker>) -> Self {
        self.stack_walker = Some(walker);
        self
    }

    #[must_use]
    pub fn external_actions(mut self, actions: Arc<dyn ExternalActions>) -> Self {
        self.actions = Some(actions);
        self
    }

    /// Send dumps through `transport` instead of a mapped file
    #[must_use]
    pub fn remote(mut self, transport: impl RemoteTransport + 'static) -> Self {
        self.remote = Some(Box::new(transport));
        self
    }

    #[must_use]
    pub fn server_threads(mut self, server_threads: Arc<ServerThreads>) -> Self {
        self.server_threads = Some(server_threads);
        self
    }

    /// Validate the configuration and open the buffer file
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the buffer file
    /// cannot be created
    pub fn build(self) -> Result<Arc<ProfilerRuntime>, AgentError> {
        let config = self.config;
        config.validate()?;

        let transport = self.remote.map_or(Transport::Local, Transport::Remote);
        let consumer = self.consumer.unwrap_or_else(|| Box::new(NullConsumer));
        let mut manager = EventBufferManager::new(transport, consumer, config.buffer_dir.clone());
        manager.open_buffer_file(config.shared_buffer_size)?;

        let instr_method_invoked =
            (0..config.max_methods).map(|_| AtomicBool::new(false)).collect();

        log::info!(
            "Profiler runtime ready: {} threads max, {} byte local / {} byte shared buffers",
            config.max_profiled_threads,
            config.local_buffer_size,
            config.shared_buffer_size
        );

        Ok(Arc::new(ProfilerRuntime {
            registry: ThreadRegistry::new(config.thread_table_capacity),
            sink: Mutex::new(EventSink::new(config.shared_buffer_size, manager)),
            clock: self.clock.unwrap_or_else(|| Arc::new(MonotonicClock)),
            server_threads: self.server_threads.unwrap_or_default(),
            actions: self.actions.unwrap_or_else(|| Arc::new(LoggingActions)),
            stack_walker: self.stack_walker.unwrap_or_else(|| Arc::new(ShadowStacks::new())),
            instr_method_invoked,
            profiled_threads_allowed: AtomicU32::new(config.max_profiled_threads),
            profiled_threads: AtomicU32::new(0),
            instrumentation_enabled: AtomicBool::new(true),
            suspend: Mutex::new(SuspendState::default()),
            sampler_reset: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            config,
        }))
    }
}

impl ProfilerRuntime {
    #[must_use]
    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            consumer: None,
            clock: None,
            stack_walker: None,
            actions: None,
            remote: None,
            server_threads: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    #[must_use]
    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    #[must_use]
    pub fn server_threads(&self) -> &Arc<ServerThreads> {
        &self.server_threads
    }

    #[must_use]
    pub fn stack_walker(&self) -> &Arc<dyn StackWalker> {
        &self.stack_walker
    }

    /// Record for `token`, created on first sight
    #[must_use]
    pub fn record_for(&self, token: &Arc<ThreadToken>) -> Arc<ThreadRecord> {
        self.registry.get_or_create(token)
    }

    // ------------------------------------------------------------------------
    // Admission and first invocation
    // ------------------------------------------------------------------------

    /// Make sure `record` is initialized for instrumentation
    ///
    /// A new thread takes one of the `max_profiled_threads` slots and is
    /// announced with `NEW_THREAD`. Returns `false` when the thread must not
    /// be profiled: no slot left, instrumentation disabled, or a profiler
    /// server thread.
    pub fn admit_thread(&self, record: &ThreadRecord, token: &Arc<ThreadToken>) -> bool {
        if record.is_initialized() {
            return true;
        }
        if !self.instrumentation_enabled.load(Ordering::Acquire)
            || self.server_threads.is_server_thread(token)
        {
            return false;
        }
        if !record.is_admitted() {
            let taken = self
                .profiled_threads_allowed
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok();
            if !taken {
                return false;
            }
            record.set_admitted(true);
            self.profiled_threads.fetch_add(1, Ordering::AcqRel);
        }

        record.initialize(self.clock.now(), Some(self.config.local_buffer_size));
        self.sink.lock().write(
            None,
            &Event::NewThread { thread_id: record.thread_id().0, name: token.name().into() },
        );
        log::debug!("Profiling thread {} as {}", token.name(), record.thread_id());
        true
    }

    /// Run the first-invocation callback if `method` has never been seen
    ///
    /// Must not be called with the record state locked.
    pub fn mark_first_invocation(&self, record: &ThreadRecord, method: MethodId) {
        let Some(flag) = self.instr_method_invoked.get(method.index()) else {
            return;
        };
        if !flag.swap(true, Ordering::AcqRel) {
            let _guard = record.enter_runtime();
            self.actions.handle_first_time_method_invoke(method);
        }
    }

    #[must_use]
    pub fn method_invoked(&self, method: MethodId) -> bool {
        self.instr_method_invoked
            .get(method.index())
            .is_some_and(|f| f.load(Ordering::Acquire))
    }

    // ------------------------------------------------------------------------
    // Writing events
    // ------------------------------------------------------------------------

    /// Timestamp a method event and write it to the thread's buffer
    pub fn write_method_event(
        &self,
        record: &ThreadRecord,
        state: &mut ThreadState,
        tag: EventTag,
        method: MethodId,
    ) -> u64 {
        let timestamp = self.clock.now();
        let thread_cpu = self.config.thread_cpu_timestamps.then(|| self.clock.thread_cpu_time());
        self.write_local(
            record,
            state,
            &Event::Method { tag, method_id: method.0, timestamp, thread_cpu },
        );
        timestamp
    }

    /// Write to the thread-local buffer, flushing it into the shared one when full
    pub fn write_local(&self, record: &ThreadRecord, state: &mut ThreadState, event: &Event<'_>) {
        let thread = record.thread_id();
        let Some(buffer) = state.ev_buf.as_mut() else {
            self.write_global(Some(thread), event);
            return;
        };
        if buffer.push(event) {
            return;
        }
        self.copy_local_buffer(thread, buffer);
        if !buffer.push(event) {
            self.write_global(Some(thread), event);
        }
    }

    /// Move the content of a thread-local buffer into the shared buffer
    pub fn copy_local_buffer(&self, thread: ThreadId, buffer: &mut EventBuffer) {
        if buffer.has_pending() {
            self.sink.lock().write_chunk(thread, buffer.pending());
        }
        buffer.clear();
    }

    /// Write straight into the shared buffer
    pub fn write_global(&self, thread: Option<ThreadId>, event: &Event<'_>) {
        self.sink.lock().write(thread, event);
    }

    /// Run `f` with the shared buffer locked
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut EventSink) -> R) -> R {
        f(&mut self.sink.lock())
    }

    /// Move every thread-local buffer into the shared buffer
    ///
    /// Events written globally afterwards follow everything the threads
    /// recorded so far.
    pub fn flush_local_buffers(&self) {
        for record in self.registry.records() {
            let mut state = record.lock_state();
            if let Some(buffer) = state.ev_buf.as_mut() {
                self.copy_local_buffer(record.thread_id(), buffer);
            }
        }
    }

    /// Flush every thread-local buffer and dump the shared buffer
    pub fn dump_existing_results(&self) {
        self.flush_local_buffers();
        self.sink.lock().dump();
    }

    /// Release records of exited threads, keeping their buffered events
    ///
    /// Returns the number of records released.
    pub fn release_dead_threads(&self) -> usize {
        let released = self.registry.release_dead_threads(|record, buffer| {
            if let Some(buffer) = buffer {
                if buffer.has_pending() {
                    self.sink.lock().write_chunk(record.thread_id(), buffer.pending());
                }
            }
            if record.set_admitted(false) {
                self.profiled_threads.fetch_sub(1, Ordering::AcqRel);
                self.profiled_threads_allowed.fetch_add(1, Ordering::AcqRel);
            }
        });
        if released > 0 {
            log::debug!("Released {released} dead thread records");
        }
        released
    }

    // ------------------------------------------------------------------------
    // Suspend / resume
    // ------------------------------------------------------------------------

    /// Stop recording for every thread currently inside a call graph
    ///
    /// Calls nest; every call must be paired with one
    /// [`Self::resume_active_timers`]. Only the outermost pair has any effect.
    pub fn suspend_active_timers(&self) {
        let mut suspend = self.suspend.lock();
        suspend.depth += 1;
        if suspend.depth > 1 {
            return;
        }
        for record in self.registry.records() {
            if record.in_call_graph() && record.impose_suspension() {
                suspend.suspended.push(record);
            }
        }
        log::debug!("Suspended {} threads", suspend.suspended.len());
        let timestamp = self.clock.now();
        self.write_global(None, &Event::Timestamp { tag: EventTag::ThreadsSuspended, timestamp });
    }

    pub fn resume_active_timers(&self) {
        let mut suspend = self.suspend.lock();
        if suspend.depth == 0 {
            log::warn!("resume_active_timers() without a matching suspend");
            return;
        }
        suspend.depth -= 1;
        if suspend.depth > 0 {
            return;
        }
        for record in suspend.suspended.drain(..) {
            record.lift_suspension();
        }
        let timestamp = self.clock.now();
        self.write_global(None, &Event::Timestamp { tag: EventTag::ThreadsResumed, timestamp });
    }

    #[must_use]
    pub fn timers_suspended(&self) -> bool {
        self.suspend.lock().depth > 0
    }

    // ------------------------------------------------------------------------
    // Collector control
    // ------------------------------------------------------------------------

    /// Forget all collected data and start over
    ///
    /// Thread records return to their never-used state and give back their
    /// admission slots; buffered events are discarded. The stream continues
    /// with `RESET_COLLECTORS` and the sampler restarts its diff on its next tick.
    pub fn reset_collectors(&self) {
        for record in self.registry.records() {
            record.reset();
            record.set_admitted(false);
        }
        self.profiled_threads.store(0, Ordering::Release);
        self.profiled_threads_allowed.store(self.config.max_profiled_threads, Ordering::Release);

        let mut sink = self.sink.lock();
        sink.discard();
        sink.write(None, &Event::ResetCollectors);
        self.sampler_reset.store(true, Ordering::Release);
        log::info!("Collectors reset");
    }

    /// Consume a pending sampler reset
    pub fn take_sampler_reset(&self) -> bool {
        self.sampler_reset.swap(false, Ordering::AcqRel)
    }

    /// Allow or refuse new threads (already admitted threads keep recording)
    pub fn set_instrumentation_enabled(&self, enabled: bool) {
        self.instrumentation_enabled.store(enabled, Ordering::Release);
    }

    #[must_use]
    pub fn instrumentation_enabled(&self) -> bool {
        self.instrumentation_enabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn profiled_thread_count(&self) -> u32 {
        self.profiled_threads.load(Ordering::Acquire)
    }

    /// Threads that may still be admitted
    #[must_use]
    pub fn profiled_threads_allowed(&self) -> u32 {
        self.profiled_threads_allowed.load(Ordering::Acquire)
    }

    /// Flush everything and release the buffer file; later calls do nothing
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_instrumentation_enabled(false);
        self.dump_existing_results();
        let mut sink = self.sink.lock();
        let manager = sink.manager_mut();
        log::info!("Runtime shut down after {} dumps ({} bytes)", manager.dumps(), manager.bytes_dumped());
        manager.free_buffer_file();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ChannelConsumer, DumpedChunk};
    use crate::timers::ManualClock;
    use crossbeam_channel::Receiver;
    use prof_agent_common::EventReader;
    use std::path::Path;

    fn runtime_with(config: RuntimeConfig) -> (Arc<ProfilerRuntime>, Receiver<DumpedChunk>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (consumer, rx) = ChannelConsumer::unbounded();
        let config = RuntimeConfig { buffer_dir: Some(dir.path().to_path_buf()), ..config };
        let runtime = ProfilerRuntime::builder(config)
            .consumer(consumer)
            .clock(Arc::new(ManualClock::new(1_000, 10)))
            .build()
            .unwrap();
        (runtime, rx, dir)
    }

    fn decode_all(rx: &Receiver<DumpedChunk>) -> Vec<Event<'static>> {
        rx.try_iter()
            .flat_map(|chunk| {
                EventReader::new(&chunk.bytes, prof_agent_common::WireConfig::default())
                    .map(Result::unwrap)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_admission_announces_thread_once() {
        let (runtime, rx, _dir) = runtime_with(RuntimeConfig::default());
        let token = ThreadToken::new("worker-1");
        let record = runtime.record_for(&token);
        assert!(runtime.admit_thread(&record, &token));
        assert!(runtime.admit_thread(&record, &token));
        assert_eq!(runtime.profiled_thread_count(), 1);

        runtime.dump_existing_results();
        let events = decode_all(&rx);
        assert_eq!(
            events,
            vec![Event::NewThread { thread_id: record.thread_id().0, name: "worker-1".into() }]
        );
    }

    #[test]
    fn test_admission_limit() {
        let config = RuntimeConfig { max_profiled_threads: 1, ..RuntimeConfig::default() };
        let (runtime, _rx, _dir) = runtime_with(config);
        let first = ThreadToken::new("a");
        let second = ThreadToken::new("b");
        assert!(runtime.admit_thread(&runtime.record_for(&first), &first));
        assert!(!runtime.admit_thread(&runtime.record_for(&second), &second));
        assert_eq!(runtime.profiled_threads_allowed(), 0);

        drop(first);
        assert_eq!(runtime.release_dead_threads(), 1);
        assert_eq!(runtime.profiled_threads_allowed(), 1);
        assert!(runtime.admit_thread(&runtime.record_for(&second), &second));
    }

    #[test]
    fn test_first_invocation_fires_once() {
        struct Counting(std::sync::atomic::AtomicU32);
        impl ExternalActions for Counting {
            fn handle_first_time_method_invoke(&self, _method: MethodId) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let actions = Arc::new(Counting(std::sync::atomic::AtomicU32::new(0)));
        let runtime = ProfilerRuntime::builder(RuntimeConfig::default())
            .external_actions(Arc::clone(&actions) as Arc<dyn ExternalActions>)
            .remote(crate::buffer::StreamTransport::new(std::io::sink()))
            .build()
            .unwrap();
        let a = runtime.record_for(&ThreadToken::new("a"));
        let b = runtime.record_for(&ThreadToken::new("b"));
        runtime.mark_first_invocation(&a, MethodId(7));
        runtime.mark_first_invocation(&b, MethodId(7));
        runtime.mark_first_invocation(&a, MethodId(8));
        assert_eq!(actions.0.load(Ordering::SeqCst), 2);
        assert!(runtime.method_invoked(MethodId(7)));
        assert!(!runtime.method_invoked(MethodId(9)));
        assert!(!a.in_runtime());
    }

    #[test]
    fn test_full_local_buffer_moves_to_shared_with_header() {
        let config = RuntimeConfig { local_buffer_size: 80, ..RuntimeConfig::default() };
        let (runtime, rx, _dir) = runtime_with(config);
        let token = ThreadToken::new("t");
        let record = runtime.record_for(&token);
        assert!(runtime.admit_thread(&record, &token));

        {
            let mut state = record.lock_state();
            for _ in 0..9 {
                runtime.write_method_event(&record, &mut state, EventTag::MethodEntry, MethodId(1));
            }
        }
        // NEW_THREAD, then the 8 events that filled the local buffer behind a header
        let new_thread = Event::NewThread { thread_id: record.thread_id().0, name: "t".into() };
        assert_eq!(runtime.with_sink(|sink| sink.buffer().len()), new_thread.encoded_len() + 3 + 80);
        runtime.with_sink(|sink| sink.dump());
        let events = decode_all(&rx);
        assert_eq!(events.len(), 1 + 1 + 8);
        assert_eq!(events[0], new_thread);
        assert_eq!(events[1], Event::SetFollowingEventsThread { thread_id: record.thread_id().0 });

        runtime.dump_existing_results();
        let rest = decode_all(&rx);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn test_suspend_resume_nest() {
        let (runtime, rx, _dir) = runtime_with(RuntimeConfig::default());
        let token = ThreadToken::new("t");
        let record = runtime.record_for(&token);
        record.set_in_call_graph(true);

        runtime.suspend_active_timers();
        runtime.suspend_active_timers();
        assert!(record.in_runtime());
        runtime.resume_active_timers();
        assert!(record.in_runtime());
        runtime.resume_active_timers();
        assert!(!record.in_runtime());
        runtime.resume_active_timers();
        assert!(!record.in_runtime());

        runtime.dump_existing_results();
        let tags: Vec<_> = decode_all(&rx).iter().map(Event::tag).collect();
        assert_eq!(tags, vec![EventTag::ThreadsSuspended, EventTag::ThreadsResumed]);
    }

    #[test]
    fn test_reset_collectors() {
        let config = RuntimeConfig { max_profiled_threads: 2, ..RuntimeConfig::default() };
        let (runtime, rx, _dir) = runtime_with(config);
        let token = ThreadToken::new("t");
        let record = runtime.record_for(&token);
        runtime.admit_thread(&record, &token);
        runtime.reset_collectors();

        assert!(!record.is_initialized());
        assert_eq!(runtime.profiled_threads_allowed(), 2);
        assert!(runtime.take_sampler_reset());
        assert!(!runtime.take_sampler_reset());

        runtime.dump_existing_results();
        assert_eq!(decode_all(&rx), vec![Event::ResetCollectors]);
    }

    #[test]
    fn test_shutdown_releases_file() {
        let (runtime, _rx, _dir) = runtime_with(RuntimeConfig::default());
        let path = runtime.with_sink(|s| s.manager().buffer_file_path().map(Path::to_path_buf)).unwrap();
        assert!(path.exists());
        runtime.shutdown();
        runtime.shutdown();
        assert!(!path.exists());
        assert!(!runtime.instrumentation_enabled());
    }
}
