//! Memory profiling runtimes
//!
//! [`ObjAlloc`] counts allocations and samples their stacks, [`ObjLiveness`]
//! additionally follows sampled objects until they are dropped.

pub mod heap;
pub mod obj_alloc;
pub mod obj_liveness;
pub mod reference_manager;
pub mod thresholds;
pub mod weak_ref_set;

pub use heap::{ClassAllocations, HeapSnapshot, HeapSource, LiveObject};
pub use obj_alloc::ObjAlloc;
pub use obj_liveness::{object_id, ObjLiveness};
pub use reference_manager::ReferenceManager;
pub use thresholds::{AllocTable, SamplingThresholds};
pub use weak_ref_set::{TrackedObject, WeakRefSet};
