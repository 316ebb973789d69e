//! Heap snapshots
//!
//! What the memory runtimes know about the heap, in a form a heap dumper can
//! serialize.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassAllocations {
    pub class_id: u16,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveObject {
    pub object_id: u64,
    pub class_id: u16,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapSnapshot {
    pub timestamp: u64,
    pub allocations: Vec<ClassAllocations>,
    pub live_objects: Vec<LiveObject>,
}

/// Anything that can add to a heap snapshot
pub trait HeapSource: Send + Sync {
    fn contribute(&self, snapshot: &mut HeapSnapshot);
}

pub(crate) fn nonzero_counts(counts: &[u64]) -> impl Iterator<Item = ClassAllocations> + '_ {
    counts.iter().enumerate().filter(|(_, &count)| count > 0).filter_map(|(class, &count)| {
        Some(ClassAllocations { class_id: u16::try_from(class).ok()?, count })
    })
}
