//! # Object allocation profiling
//!
//! Counts every instrumented allocation per class and captures the stack of
//! a sampled subset as `OBJ_ALLOC_STACK_TRACE`.

use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::Arc;

use prof_agent_common::Event;

use super::heap::{nonzero_counts, HeapSnapshot, HeapSource};
use super::thresholds::{AllocTable, SamplingThresholds};
use crate::domain::ClassId;
use crate::runtime::ProfilerRuntime;
use crate::threads::ThreadToken;

#[derive(Debug)]
pub struct ObjAlloc {
    runtime: Arc<ProfilerRuntime>,
    table: Mutex<AllocTable>,
}

impl ObjAlloc {
    #[must_use]
    pub fn new(runtime: Arc<ProfilerRuntime>) -> Self {
        let config = runtime.config();
        let thresholds =
            SamplingThresholds::new(config.alloc_sampling_interval, config.alloc_sampling_seed);
        let table = Mutex::new(AllocTable::new(config.max_classes, thresholds));
        Self { runtime, table }
    }

    pub fn trace_obj_alloc<T: ?Sized>(&self, object: &T, class: impl Into<ClassId>) {
        let class = class.into();
        ThreadToken::with_current(|t| self.trace_obj_alloc_on(t, object, class));
    }

    pub fn trace_obj_alloc_on<T: ?Sized>(&self, thread: &Arc<ThreadToken>, object: &T, class: ClassId) {
        let record = self.runtime.record_for(thread);
        if record.in_runtime() || !self.runtime.admit_thread(&record, thread) {
            return;
        }
        let _guard = record.enter_runtime();
        if !self.table.lock().record(class) {
            return;
        }

        let frames = self.runtime.stack_walker().thread_stack(thread, self.runtime.config().max_stack_depth);
        let size = std::mem::size_of_val(object) as u64;
        let mut state = record.lock_state();
        self.runtime.write_local(
            &record,
            &mut state,
            &Event::ObjAllocStackTrace { class_id: class.0, size, frames: Cow::Owned(frames) },
        );
    }

    #[must_use]
    pub fn allocation_count(&self, class: ClassId) -> u64 {
        self.table.lock().count(class)
    }

    /// Allocation count per class id
    #[must_use]
    pub fn allocation_counts(&self) -> Vec<u64> {
        self.table.lock().counts().to_vec()
    }

    pub fn reset(&self) {
        self.table.lock().reset();
    }
}

impl HeapSource for ObjAlloc {
    fn contribute(&self, snapshot: &mut HeapSnapshot) {
        let table = self.table.lock();
        snapshot.allocations.extend(nonzero_counts(table.counts()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::sampling::{ShadowStacks, StackWalker};
    use crate::test_support::Capture;
    use prof_agent_common::EventTag;

    #[test]
    fn test_every_allocation_sampled_at_interval_one() {
        let stacks = Arc::new(ShadowStacks::new());
        let walker: Arc<dyn StackWalker> = stacks.clone();
        let config = RuntimeConfig { alloc_sampling_interval: 1, ..RuntimeConfig::default() };
        let capture = Capture::with(config, |b| b.stack_walker(walker));
        let alloc = ObjAlloc::new(capture.runtime.clone());
        let t = ThreadToken::new("main");
        stacks.push(&t, 100);
        stacks.push(&t, 101);

        let object = [0u64; 4];
        for _ in 0..3 {
            alloc.trace_obj_alloc_on(&t, &object, ClassId(5));
        }
        assert_eq!(alloc.allocation_count(ClassId(5)), 3);

        let traces: Vec<_> = capture
            .events()
            .into_iter()
            .filter(|e| e.tag() == EventTag::ObjAllocStackTrace)
            .collect();
        assert_eq!(traces.len(), 3);
        assert_eq!(
            traces[0],
            Event::ObjAllocStackTrace { class_id: 5, size: 32, frames: vec![100, 101].into() }
        );
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let run = || {
            let config = RuntimeConfig {
                alloc_sampling_interval: 8,
                alloc_sampling_seed: Some(99),
                ..RuntimeConfig::default()
            };
            let capture = Capture::new(config);
            let alloc = ObjAlloc::new(capture.runtime.clone());
            let t = ThreadToken::new("main");
            for i in 0..500u16 {
                alloc.trace_obj_alloc_on(&t, &i, ClassId(i % 3));
            }
            capture.events()
        };
        let first = run();
        assert_eq!(first, run());
        let traces = first.iter().filter(|e| e.tag() == EventTag::ObjAllocStackTrace).count();
        assert!(traces > 500 / 12 && traces < 500 / 4 + 3, "{traces}");
    }

    #[test]
    fn test_capture_count_follows_threshold_sequence() {
        const ALLOCATIONS: u64 = 400;
        let mut thresholds = SamplingThresholds::new(10, Some(3));
        let mut expected = 0;
        let mut next_capture = 0;
        while next_capture < ALLOCATIONS {
            expected += 1;
            next_capture += u64::from(thresholds.next_threshold());
        }

        let config = RuntimeConfig {
            alloc_sampling_interval: 10,
            alloc_sampling_seed: Some(3),
            ..RuntimeConfig::default()
        };
        let capture = Capture::new(config);
        let alloc = ObjAlloc::new(capture.runtime.clone());
        let t = ThreadToken::new("main");
        for _ in 0..ALLOCATIONS {
            alloc.trace_obj_alloc_on(&t, &0u32, ClassId(6));
        }

        let traces = capture.tags().into_iter().filter(|t| *t == EventTag::ObjAllocStackTrace).count();
        assert_eq!(traces, expected);
        assert_eq!(alloc.allocation_count(ClassId(6)), ALLOCATIONS);
    }

    #[test]
    fn test_excluded_thread_is_not_counted() {
        let config = RuntimeConfig { max_profiled_threads: 0, ..RuntimeConfig::default() };
        let capture = Capture::new(config);
        let alloc = ObjAlloc::new(capture.runtime.clone());
        alloc.trace_obj_alloc_on(&ThreadToken::new("x"), &1u8, ClassId(1));
        assert_eq!(alloc.allocation_count(ClassId(1)), 0);
        assert!(capture.events().is_empty());
    }

    #[test]
    fn test_snapshot_lists_nonzero_classes() {
        let capture = Capture::new(RuntimeConfig::default());
        let alloc = ObjAlloc::new(capture.runtime.clone());
        let t = ThreadToken::new("main");
        alloc.trace_obj_alloc_on(&t, &1u8, ClassId(3));
        alloc.trace_obj_alloc_on(&t, &1u8, ClassId(3));
        let mut snapshot = HeapSnapshot::default();
        alloc.contribute(&mut snapshot);
        assert_eq!(snapshot.allocations.len(), 1);
        assert_eq!(snapshot.allocations[0].class_id, 3);
        assert_eq!(snapshot.allocations[0].count, 2);

        alloc.reset();
        assert_eq!(alloc.allocation_count(ClassId(3)), 0);
    }
}
