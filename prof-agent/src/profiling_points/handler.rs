//! Profiling point handlers

use std::sync::Arc;

use prof_agent_common::Event;

use crate::domain::{HandlerError, ThreadId};
use crate::runtime::ProfilerRuntime;
use crate::threads::ThreadRecord;

use super::heap_dump::HeapDumper;

/// One hit of a profiling point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointHit {
    pub point_id: i32,
    pub timestamp: u64,
    pub thread: ThreadId,
}

impl PointHit {
    /// Wire form of the hit
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_event(&self) -> Event<'static> {
        Event::ProfilePointHit {
            point_id: (self.point_id & 0xFFFF) as u16,
            timestamp: self.timestamp,
            thread_id: self.thread.0,
        }
    }
}

pub trait ProfilingPointHandler: Send + Sync {
    /// Called on the hitting thread with its reentrancy guard raised
    fn profile_point_hit(&self, record: &ThreadRecord, hit: &PointHit);
}

/// What handler constructors get to work with
#[derive(Clone)]
pub struct HandlerContext {
    pub runtime: Arc<ProfilerRuntime>,
    pub heap_dumper: Arc<dyn HeapDumper>,
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext").finish_non_exhaustive()
    }
}

impl HandlerContext {
    /// Context whose heap dumps contain nothing but a timestamp
    #[must_use]
    pub fn new(runtime: Arc<ProfilerRuntime>) -> Self {
        Self { runtime, heap_dumper: Arc::new(super::heap_dump::JsonHeapDumper::new(Vec::new())) }
    }

    #[must_use]
    pub fn with_heap_dumper(mut self, heap_dumper: Arc<dyn HeapDumper>) -> Self {
        self.heap_dumper = heap_dumper;
        self
    }
}

/// Records the hit in the thread's event stream
#[derive(Debug)]
pub struct DefaultHandler {
    runtime: Arc<ProfilerRuntime>,
}

impl DefaultHandler {
    #[must_use]
    pub fn new(runtime: Arc<ProfilerRuntime>) -> Self {
        Self { runtime }
    }

    /// # Errors
    /// Never fails; the configuration string is ignored
    pub fn create(
        ctx: &HandlerContext,
        _info: &str,
    ) -> Result<Arc<dyn ProfilingPointHandler>, HandlerError> {
        Ok(Arc::new(Self::new(Arc::clone(&ctx.runtime))))
    }
}

impl ProfilingPointHandler for DefaultHandler {
    fn profile_point_hit(&self, record: &ThreadRecord, hit: &PointHit) {
        let mut state = record.lock_state();
        self.runtime.write_local(record, &mut state, &hit.to_event());
    }
}
