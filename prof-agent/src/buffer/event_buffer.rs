//! Bounded event buffer
//!
//! Used both as a thread-local buffer (owned by a `ThreadRecord`) and as the
//! shared buffer behind the runtime's sink lock. Events are appended whole or
//! not at all.

use prof_agent_common::Event;

#[derive(Debug, Clone)]
pub struct EventBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    dump_last_pos: usize,
}

impl EventBuffer {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { bytes: Vec::with_capacity(capacity), capacity, dump_last_pos: 0 }
    }

    /// Write cursor
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    #[must_use]
    pub fn fits(&self, len: usize) -> bool {
        len <= self.remaining()
    }

    /// Append an event; returns `false` (and writes nothing) if it doesn't fit
    pub fn push(&mut self, event: &Event<'_>) -> bool {
        if !self.fits(event.encoded_len()) {
            return false;
        }
        event.encode(&mut self.bytes);
        true
    }

    /// Append already-encoded bytes; returns `false` if they don't fit
    pub fn extend_raw(&mut self, bytes: &[u8]) -> bool {
        if !self.fits(bytes.len()) {
            return false;
        }
        self.bytes.extend_from_slice(bytes);
        true
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes written since the last dump
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.bytes[self.dump_last_pos..]
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.dump_last_pos < self.bytes.len()
    }

    /// Everything written so far has been handed on
    pub fn mark_dumped(&mut self) {
        self.dump_last_pos = self.bytes.len();
    }

    #[must_use]
    pub fn dump_last_pos(&self) -> usize {
        self.dump_last_pos
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.dump_last_pos = 0;
    }
}
