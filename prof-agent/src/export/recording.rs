//! Decoded recordings
//!
//! Each dumped chunk starts without a thread context. A
//! `SET_FOLLOWING_EVENTS_THREAD` header attributes the thread-scoped events
//! after it (method, blocking and allocation events) to one thread until the
//! next header or the end of the chunk. Events that name their thread carry
//! it themselves; everything else is global.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use prof_agent_common::{DecodeError, Event, EventReader, EventTag, WireConfig};

use crate::buffer::read_frame;

/// An event together with the thread it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEvent {
    pub thread: Option<u16>,
    pub event: Event<'static>,
}

#[derive(Debug, Default)]
pub struct Recording {
    wire: WireConfig,
    events: Vec<ThreadEvent>,
    thread_names: BTreeMap<u16, String>,
    chunks: usize,
}

impl Recording {
    #[must_use]
    pub fn new(wire: WireConfig) -> Self {
        Self { wire, ..Self::default() }
    }

    /// Decode a recording file of length-prefixed chunks
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a chunk fails to decode
    pub fn open(path: &Path, wire: WireConfig) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open recording {}", path.display()))?;
        Self::from_frames(std::io::BufReader::new(file), wire)
            .with_context(|| format!("Failed to decode recording {}", path.display()))
    }

    /// # Errors
    /// Returns an error on a truncated frame or an undecodable chunk
    pub fn from_frames(mut reader: impl Read, wire: WireConfig) -> Result<Self> {
        let mut recording = Self::new(wire);
        while let Some(frame) = read_frame(&mut reader).context("Failed to read frame")? {
            let index = recording.chunks;
            recording.push_chunk(&frame).with_context(|| format!("Chunk {index}"))?;
        }
        Ok(recording)
    }

    /// Decode one dumped chunk and append its events
    ///
    /// # Errors
    /// Returns the first decode error; events before it are kept
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), DecodeError> {
        self.chunks += 1;
        let mut thread = None;
        for event in EventReader::new(chunk, self.wire) {
            let event = event?;
            match &event {
                Event::SetFollowingEventsThread { thread_id } => {
                    thread = Some(*thread_id);
                    continue;
                }
                Event::NewThread { thread_id, name } => {
                    self.thread_names.insert(*thread_id, name.to_string());
                }
                _ => {}
            }
            let owner = match &event {
                Event::ProfilePointHit { thread_id, .. }
                | Event::ThreadInfo { thread_id, .. }
                | Event::ThreadInfoIdentical { thread_id } => Some(*thread_id),
                Event::Method { .. }
                | Event::ObjAllocStackTrace { .. }
                | Event::ObjLivenessStackTrace { .. } => thread,
                Event::Timestamp { tag, .. } if is_blocking(*tag) => thread,
                _ => None,
            };
            self.events.push(ThreadEvent { thread: owner, event });
        }
        Ok(())
    }

    #[must_use]
    pub fn events(&self) -> &[ThreadEvent] {
        &self.events
    }

    #[must_use]
    pub fn thread_name(&self, thread: u16) -> Option<&str> {
        self.thread_names.get(&thread).map(String::as_str)
    }

    pub fn thread_names(&self) -> impl Iterator<Item = (u16, &str)> {
        self.thread_names.iter().map(|(id, name)| (*id, name.as_str()))
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Events attributed to `thread`, in stream order
    pub fn thread_events(&self, thread: u16) -> impl Iterator<Item = &Event<'static>> {
        self.events.iter().filter(move |e| e.thread == Some(thread)).map(|e| &e.event)
    }
}

fn is_blocking(tag: EventTag) -> bool {
    tag.is_timestamp_event()
        && !matches!(tag, EventTag::ThreadsSuspended | EventTag::ThreadsResumed | EventTag::ThreadDumpStart)
}
