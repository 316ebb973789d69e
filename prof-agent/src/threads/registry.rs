//! Thread table
//!
//! Open-addressing hash table from live threads to their [`ThreadRecord`].
//!
//! ## Lookup
//!
//! 1. Fast path: the record handed out last, if it belongs to the same thread
//! 2. Probe under the read lock
//! 3. On a miss, probe again under the write lock and create the record
//!
//! ## Growth
//!
//! Load factor is kept at or below 0.75. When an insert would exceed it the
//! table is rehashed: at the same capacity if released (dead) records can be
//! dropped, otherwise at `2 * capacity + 1`.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::{ThreadRecord, ThreadToken};
use crate::buffer::EventBuffer;
use crate::domain::ThreadId;

#[derive(Debug)]
struct Table {
    slots: Vec<Option<Arc<ThreadRecord>>>,
    occupied: usize,
    has_dead: bool,
    next_id: u32,
    free_ids: Vec<ThreadId>,
}

impl Table {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(2)],
            occupied: 0,
            has_dead: false,
            next_id: 0,
            free_ids: Vec::new(),
        }
    }

    fn home(&self, hash: u32) -> usize {
        hash as usize % self.slots.len()
    }

    fn find(&self, token: &Arc<ThreadToken>) -> Option<Arc<ThreadRecord>> {
        let cap = self.slots.len();
        let mut idx = self.home(token.identity_hash());
        for _ in 0..cap {
            match &self.slots[idx] {
                None => return None,
                Some(record) if record.is_thread(token) => return Some(Arc::clone(record)),
                Some(_) => idx = (idx + 1) % cap,
            }
        }
        None
    }

    #[allow(clippy::cast_possible_truncation)]
    fn allocate_id(&mut self) -> ThreadId {
        if let Some(id) = self.free_ids.pop() {
            return id;
        }
        let id = ThreadId((self.next_id & 0xFFFF) as u16);
        self.next_id += 1;
        id
    }

    fn place(&mut self, record: Arc<ThreadRecord>) {
        let cap = self.slots.len();
        let mut idx = self.home(record.hash());
        while self.slots[idx].is_some() {
            idx = (idx + 1) % cap;
        }
        self.slots[idx] = Some(record);
        self.occupied += 1;
    }

    fn needs_rehash(&self) -> bool {
        (self.occupied + 1) * 4 > self.slots.len() * 3
    }

    fn rehash(&mut self) {
        let new_capacity = if self.has_dead {
            self.slots.len()
        } else {
            self.slots.len() * 2 + 1
        };
        let old = std::mem::replace(&mut self.slots, vec![None; new_capacity]);
        self.occupied = 0;
        for record in old.into_iter().flatten() {
            if record.is_released() {
                self.free_ids.push(record.thread_id());
            } else {
                self.place(record);
            }
        }
        self.has_dead = false;
        log::debug!("Thread table rehashed to capacity {new_capacity} ({} live)", self.occupied);
    }
}

/// Registry of every thread that has reached the instrumentation runtime
#[derive(Debug)]
pub struct ThreadRegistry {
    table: RwLock<Table>,
    last: Mutex<Option<Arc<ThreadRecord>>>,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { table: RwLock::new(Table::new(capacity)), last: Mutex::new(None) }
    }

    /// Record for `token`, created on first sight. Never fails.
    pub fn get_or_create(&self, token: &Arc<ThreadToken>) -> Arc<ThreadRecord> {
        // A contended cache is skipped, not waited on
        if let Some(last) = self.last.try_lock() {
            if let Some(record) = last.as_ref().filter(|r| r.is_thread(token)) {
                return Arc::clone(record);
            }
        }

        let found = self.table.read().find(token);
        let record = found.unwrap_or_else(|| self.create(token));

        if let Some(mut last) = self.last.try_lock() {
            *last = Some(Arc::clone(&record));
        }
        record
    }

    /// Record for `token` if one exists
    #[must_use]
    pub fn get(&self, token: &Arc<ThreadToken>) -> Option<Arc<ThreadRecord>> {
        self.table.read().find(token)
    }

    fn create(&self, token: &Arc<ThreadToken>) -> Arc<ThreadRecord> {
        let mut table = self.table.write();
        // Another caller may have created it between our probes
        if let Some(record) = table.find(token) {
            return record;
        }
        if table.needs_rehash() {
            table.rehash();
        }
        let id = table.allocate_id();
        let record = Arc::new(ThreadRecord::new(id, token));
        table.place(Arc::clone(&record));
        log::debug!("New thread record {id} for \"{}\"", token.name());
        record
    }

    /// Release every record whose thread has exited
    ///
    /// `on_release` receives each released record together with its local
    /// buffer (if it had one) after the table lock has been dropped.
    /// Returns the number of records released.
    pub fn release_dead_threads(
        &self,
        mut on_release: impl FnMut(&ThreadRecord, Option<EventBuffer>),
    ) -> usize {
        let mut released = Vec::new();
        {
            let mut table = self.table.write();
            for record in table.slots.iter().flatten() {
                if !record.is_released() && !record.is_alive() {
                    let buffer = record.release();
                    released.push((Arc::clone(record), buffer));
                }
            }
            if !released.is_empty() {
                table.has_dead = true;
            }
        }

        {
            let mut last = self.last.lock();
            if last.as_ref().is_some_and(|r| r.is_released()) {
                *last = None;
            }
        }

        for (record, buffer) in &mut released {
            on_release(record, buffer.take());
        }
        released.len()
    }

    /// Snapshot of all records that still belong to a thread
    #[must_use]
    pub fn records(&self) -> Vec<Arc<ThreadRecord>> {
        self.table
            .read()
            .slots
            .iter()
            .flatten()
            .filter(|r| !r.is_released())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.table.read().slots.len()
    }

    /// Number of records that still belong to a thread
    #[must_use]
    pub fn len(&self) -> usize {
        self.records().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether released records are waiting to be compacted
    #[must_use]
    pub fn has_dead_slots(&self) -> bool {
        self.table.read().has_dead
    }
}
