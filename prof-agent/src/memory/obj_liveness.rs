//! # Object liveness profiling
//!
//! Sampled allocations are tracked through a `Weak` reference. Each one gets
//! an object id
//!
//! ```text
//! bits 63..48  class id
//! bits 47..32  GC epoch (low 16 bits)
//! bits 31..0   per-class sequence number
//! ```
//!
//! and is reported with `OBJ_LIVENESS_STACK_TRACE`. [`ObjLiveness::reap`]
//! reports every tracked object that has been dropped since the previous
//! call with `OBJ_GC_HAPPENED` and starts a new epoch.

use parking_lot::Mutex;
use std::any::Any;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use prof_agent_common::Event;

use super::heap::{nonzero_counts, HeapSnapshot, HeapSource, LiveObject};
use super::thresholds::{AllocTable, SamplingThresholds};
use super::weak_ref_set::{TrackedObject, WeakRefSet};
use crate::domain::ClassId;
use crate::runtime::ProfilerRuntime;
use crate::threads::ThreadToken;

#[derive(Debug)]
struct LivenessTable {
    alloc: AllocTable,
    sequences: Vec<u32>,
}

#[derive(Debug)]
pub struct ObjLiveness {
    runtime: Arc<ProfilerRuntime>,
    table: Mutex<LivenessTable>,
    tracked: Mutex<WeakRefSet>,
    gc_epoch: AtomicU32,
}

/// Compose an object id from its parts
#[must_use]
pub fn object_id(class: ClassId, epoch: u32, sequence: u32) -> u64 {
    (u64::from(class.0) << 48) | (u64::from(epoch & 0xFFFF) << 32) | u64::from(sequence)
}

impl ObjLiveness {
    #[must_use]
    pub fn new(runtime: Arc<ProfilerRuntime>) -> Self {
        let config = runtime.config();
        let thresholds =
            SamplingThresholds::new(config.alloc_sampling_interval, config.alloc_sampling_seed);
        let table = LivenessTable {
            alloc: AllocTable::new(config.max_classes, thresholds),
            sequences: vec![0; config.max_classes],
        };
        Self {
            runtime,
            table: Mutex::new(table),
            tracked: Mutex::new(WeakRefSet::default()),
            gc_epoch: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<ProfilerRuntime> {
        &self.runtime
    }

    pub fn trace_obj_alloc<T: Any + Send + Sync>(&self, object: &Arc<T>, class: impl Into<ClassId>) {
        let class = class.into();
        ThreadToken::with_current(|t| self.trace_obj_alloc_on(t, object, class));
    }

    pub fn trace_obj_alloc_on<T: Any + Send + Sync>(
        &self,
        thread: &Arc<ThreadToken>,
        object: &Arc<T>,
        class: ClassId,
    ) {
        let record = self.runtime.record_for(thread);
        if record.in_runtime() || !self.runtime.admit_thread(&record, thread) {
            return;
        }
        let _guard = record.enter_runtime();

        let object_id = {
            let mut table = self.table.lock();
            if !table.alloc.record(class) {
                return;
            }
            let sequence = &mut table.sequences[class.index()];
            let id = object_id(class, self.gc_epoch.load(Ordering::Acquire), *sequence);
            *sequence = sequence.wrapping_add(1);
            id
        };

        let size = std::mem::size_of::<T>() as u64;
        let referent: Weak<T> = Arc::downgrade(object);
        let referent: Weak<dyn Any + Send + Sync> = referent;
        self.tracked.lock().insert(TrackedObject::new(object_id, class, size, referent));

        let frames = self.runtime.stack_walker().thread_stack(thread, self.runtime.config().max_stack_depth);
        let mut state = record.lock_state();
        self.runtime.write_local(
            &record,
            &mut state,
            &Event::ObjLivenessStackTrace {
                class_id: class.0,
                object_id,
                size,
                frames: Cow::Owned(frames),
            },
        );
    }

    /// Report tracked objects that have been dropped
    ///
    /// Returns how many were reclaimed. A non-empty sweep starts a new GC epoch.
    pub fn reap(&self) -> usize {
        let dead = self.tracked.lock().drain_dead();
        if dead.is_empty() {
            return 0;
        }
        // Allocation traces still in local buffers must precede their GC events
        self.runtime.flush_local_buffers();
        for object in &dead {
            self.runtime.write_global(None, &Event::ObjGcHappened { object_id: object.object_id });
        }
        let epoch = self.gc_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("{} tracked objects reclaimed, GC epoch {epoch}", dead.len());
        dead.len()
    }

    #[must_use]
    pub fn gc_epoch(&self) -> u32 {
        self.gc_epoch.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    #[must_use]
    pub fn allocation_count(&self, class: ClassId) -> u64 {
        self.table.lock().alloc.count(class)
    }

    /// Tracked objects that are still alive
    #[must_use]
    pub fn live_objects(&self) -> Vec<LiveObject> {
        let mut live: Vec<_> = self
            .tracked
            .lock()
            .iter()
            .filter(|o| o.is_alive())
            .map(|o| LiveObject { object_id: o.object_id, class_id: o.class.0, size: o.size })
            .collect();
        live.sort_by_key(|o| o.object_id);
        live
    }

    /// Stop tracking everything and restart counters
    pub fn reset(&self) {
        let mut table = self.table.lock();
        table.alloc.reset();
        table.sequences.fill(0);
        self.tracked.lock().clear();
    }
}

impl HeapSource for ObjLiveness {
    fn contribute(&self, snapshot: &mut HeapSnapshot) {
        {
            let table = self.table.lock();
            snapshot.allocations.extend(nonzero_counts(table.alloc.counts()));
        }
        snapshot.live_objects.extend(self.live_objects());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::test_support::Capture;
    use prof_agent_common::EventTag;

    fn liveness() -> (Capture, ObjLiveness) {
        let config = RuntimeConfig { alloc_sampling_interval: 1, ..RuntimeConfig::default() };
        let capture = Capture::new(config);
        let liveness = ObjLiveness::new(capture.runtime.clone());
        (capture, liveness)
    }

    #[test]
    fn test_object_id_layout() {
        assert_eq!(object_id(ClassId(2), 1, 5), 0x0002_0001_0000_0005);
        assert_eq!(object_id(ClassId(0xFFFF), 0x1_0003, 0), 0xFFFF_0003_0000_0000);
    }

    #[test]
    fn test_dropped_objects_reported_once() {
        let (capture, liveness) = liveness();
        let t = ThreadToken::new("main");
        let kept = Arc::new(String::from("kept"));
        let dropped = Arc::new(String::from("dropped"));
        liveness.trace_obj_alloc_on(&t, &kept, ClassId(1));
        liveness.trace_obj_alloc_on(&t, &dropped, ClassId(1));
        assert_eq!(liveness.tracked_count(), 2);

        assert_eq!(liveness.reap(), 0);
        assert_eq!(liveness.gc_epoch(), 0);
        drop(dropped);
        assert_eq!(liveness.reap(), 1);
        assert_eq!(liveness.reap(), 0);
        assert_eq!(liveness.gc_epoch(), 1);

        let events = capture.events();
        let gc: Vec<_> = events.iter().filter(|e| e.tag() == EventTag::ObjGcHappened).collect();
        assert_eq!(gc, vec![&Event::ObjGcHappened { object_id: object_id(ClassId(1), 0, 1) }]);
        let traced = events.iter().filter(|e| e.tag() == EventTag::ObjLivenessStackTrace).count();
        assert_eq!(traced, 2);
        assert_eq!(liveness.live_objects().len(), 1);
    }

    #[test]
    fn test_gc_event_follows_allocation_trace() {
        let (capture, liveness) = liveness();
        let t = ThreadToken::new("main");
        let object = Arc::new(vec![0u8; 16]);
        liveness.trace_obj_alloc_on(&t, &object, ClassId(2));
        drop(object);
        assert_eq!(liveness.reap(), 1);

        let tags: Vec<_> = capture
            .tags()
            .into_iter()
            .filter(|t| matches!(t, EventTag::ObjLivenessStackTrace | EventTag::ObjGcHappened))
            .collect();
        assert_eq!(tags, vec![EventTag::ObjLivenessStackTrace, EventTag::ObjGcHappened]);
    }

    #[test]
    fn test_calling_thread_alloc_is_tracked() {
        let (capture, liveness) = liveness();
        std::thread::scope(|s| {
            s.spawn(|| liveness.trace_obj_alloc(&Arc::new(7u64), 5u16));
        });
        assert_eq!(liveness.tracked_count(), 1);
        let sizes: Vec<_> = capture
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ObjLivenessStackTrace { size, .. } => Some(size),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![8]);
    }

    #[test]
    fn test_new_epoch_in_later_ids() {
        let (capture, liveness) = liveness();
        let t = ThreadToken::new("main");
        liveness.trace_obj_alloc_on(&t, &Arc::new(1u8), ClassId(3));
        liveness.reap();
        let later = Arc::new(2u8);
        liveness.trace_obj_alloc_on(&t, &later, ClassId(3));

        let ids: Vec<_> = capture
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ObjLivenessStackTrace { object_id, .. } => Some(object_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![object_id(ClassId(3), 0, 0), object_id(ClassId(3), 1, 1)]);
        assert_eq!(liveness.live_objects()[0].size, 1);
    }
}
