//! Set of weakly held objects, keyed by object id
//!
//! Open addressing with linear probing. Removal uses backward-shift deletion,
//! so there are no tombstones and probe chains stay short.

use std::any::Any;
use std::sync::Weak;

use crate::domain::ClassId;

pub struct TrackedObject {
    pub object_id: u64,
    pub class: ClassId,
    pub size: u64,
    referent: Weak<dyn Any + Send + Sync>,
}

impl TrackedObject {
    #[must_use]
    pub fn new(object_id: u64, class: ClassId, size: u64, referent: Weak<dyn Any + Send + Sync>) -> Self {
        Self { object_id, class, size, referent }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.referent.strong_count() > 0
    }
}

impl std::fmt::Debug for TrackedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedObject")
            .field("object_id", &format_args!("{:#018x}", self.object_id))
            .field("class", &self.class)
            .field("size", &self.size)
            .field("alive", &self.is_alive())
            .finish()
    }
}

const MIN_CAPACITY: usize = 16;

#[derive(Debug)]
pub struct WeakRefSet {
    slots: Vec<Option<TrackedObject>>,
    len: usize,
}

impl Default for WeakRefSet {
    fn default() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }
}

impl WeakRefSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(MIN_CAPACITY), || None);
        Self { slots, len: 0 }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn home(&self, object_id: u64) -> usize {
        let mixed = object_id.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (mixed >> 32) as usize % self.slots.len()
    }

    fn find(&self, object_id: u64) -> Option<usize> {
        let cap = self.slots.len();
        let mut idx = self.home(object_id);
        for _ in 0..cap {
            match &self.slots[idx] {
                None => return None,
                Some(entry) if entry.object_id == object_id => return Some(idx),
                Some(_) => idx = (idx + 1) % cap,
            }
        }
        None
    }

    /// Insert or replace the entry for `object.object_id`
    pub fn insert(&mut self, object: TrackedObject) {
        if let Some(idx) = self.find(object.object_id) {
            self.slots[idx] = Some(object);
            return;
        }
        if (self.len + 1) * 4 > self.slots.len() * 3 {
            self.grow(self.slots.len() * 2);
        }
        self.place(object);
        self.len += 1;
    }

    fn place(&mut self, object: TrackedObject) {
        let cap = self.slots.len();
        let mut idx = self.home(object.object_id);
        while self.slots[idx].is_some() {
            idx = (idx + 1) % cap;
        }
        self.slots[idx] = Some(object);
    }

    #[must_use]
    pub fn contains(&self, object_id: u64) -> bool {
        self.find(object_id).is_some()
    }

    pub fn remove(&mut self, object_id: u64) -> Option<TrackedObject> {
        let mut hole = self.find(object_id)?;
        let removed = self.slots[hole].take();
        self.len -= 1;

        let cap = self.slots.len();
        let mut next = (hole + 1) % cap;
        while let Some(entry) = &self.slots[next] {
            let home = self.home(entry.object_id);
            // Entry may move into the hole unless its home lies in (hole, next]
            let stays = if hole <= next {
                hole < home && home <= next
            } else {
                hole < home || home <= next
            };
            if !stays {
                self.slots[hole] = self.slots[next].take();
                hole = next;
            }
            next = (next + 1) % cap;
        }
        removed
    }

    /// Remove and return every entry whose object has been dropped
    pub fn drain_dead(&mut self) -> Vec<TrackedObject> {
        let mut dead = Vec::new();
        let capacity = self.slots.len();
        let old = std::mem::take(&mut self.slots);
        self.slots.resize_with(capacity, || None);
        self.len = 0;
        for entry in old.into_iter().flatten() {
            if entry.is_alive() {
                self.place(entry);
                self.len += 1;
            } else {
                dead.push(entry);
            }
        }
        dead
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedObject> {
        self.slots.iter().flatten()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.len = 0;
    }

    fn grow(&mut self, capacity: usize) {
        let old = std::mem::take(&mut self.slots);
        self.slots.resize_with(capacity, || None);
        for entry in old.into_iter().flatten() {
            self.place(entry);
        }
    }
}
