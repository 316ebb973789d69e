//! Event encoding and decoding
//!
//! [`Event`] is used on both sides of the wire: the agent builds borrowed
//! events and appends them to a buffer with [`Event::encode`], the client
//! side walks a byte slice with [`EventReader`] and receives owned events.

use std::borrow::Cow;

use thiserror::Error;

use crate::{EventTag, ThreadStatus, TIMESTAMP_BYTES, TIMESTAMP_MASK};

/// Options that change the shape of encoded events
///
/// Both ends of the stream must agree on these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireConfig {
    /// Method events carry a second 7-byte thread-CPU timestamp
    pub thread_cpu_timestamps: bool,
}

/// One event of the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<'a> {
    /// Method, root or marker entry/exit
    Method { tag: EventTag, method_id: u16, timestamp: u64, thread_cpu: Option<u64> },
    /// Events whose only payload is a timestamp (blocking hooks, suspend/resume, dump start)
    Timestamp { tag: EventTag, timestamp: u64 },
    SetFollowingEventsThread { thread_id: u16 },
    NewThread { thread_id: u16, name: Cow<'a, str> },
    ThreadDumpEnd,
    ThreadInfoIdentical { thread_id: u16 },
    ThreadInfo { thread_id: u16, status: ThreadStatus, frames: Cow<'a, [u32]> },
    ObjAllocStackTrace { class_id: u16, size: u64, frames: Cow<'a, [u32]> },
    ObjLivenessStackTrace { class_id: u16, object_id: u64, size: u64, frames: Cow<'a, [u32]> },
    ObjGcHappened { object_id: u64 },
    ProfilePointHit { point_id: u16, timestamp: u64, thread_id: u16 },
    ResetCollectors,
}

/// Error produced while decoding a byte stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown event tag {tag} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("Truncated {tag:?} event at offset {offset}")]
    Truncated { tag: EventTag, offset: usize },

    #[error("Invalid thread status {status} at offset {offset}")]
    InvalidStatus { status: u8, offset: usize },

    #[error("Thread name at offset {offset} is not valid UTF-8")]
    InvalidName { offset: usize },
}

impl Event<'_> {
    /// Tag byte this event is written with
    #[must_use]
    pub fn tag(&self) -> EventTag {
        match self {
            Self::Method { tag, .. } | Self::Timestamp { tag, .. } => *tag,
            Self::SetFollowingEventsThread { .. } => EventTag::SetFollowingEventsThread,
            Self::NewThread { .. } => EventTag::NewThread,
            Self::ThreadDumpEnd => EventTag::ThreadDumpEnd,
            Self::ThreadInfoIdentical { .. } => EventTag::ThreadInfoIdentical,
            Self::ThreadInfo { .. } => EventTag::ThreadInfo,
            Self::ObjAllocStackTrace { .. } => EventTag::ObjAllocStackTrace,
            Self::ObjLivenessStackTrace { .. } => EventTag::ObjLivenessStackTrace,
            Self::ObjGcHappened { .. } => EventTag::ObjGcHappened,
            Self::ProfilePointHit { .. } => EventTag::ProfilePointHit,
            Self::ResetCollectors => EventTag::ResetCollectors,
        }
    }

    /// Timestamp carried by the event, if any
    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Self::Method { timestamp, .. }
            | Self::Timestamp { timestamp, .. }
            | Self::ProfilePointHit { timestamp, .. } => Some(*timestamp),
            _ => None,
        }
    }

    /// Number of bytes [`Event::encode`] appends
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Method { thread_cpu, .. } => {
                2 + TIMESTAMP_BYTES + if thread_cpu.is_some() { TIMESTAMP_BYTES } else { 0 }
            }
            Self::Timestamp { .. } => TIMESTAMP_BYTES,
            Self::SetFollowingEventsThread { .. } | Self::ThreadInfoIdentical { .. } => 2,
            Self::NewThread { name, .. } => 4 + truncated_name(name).len(),
            Self::ThreadDumpEnd | Self::ResetCollectors => 0,
            Self::ThreadInfo { frames, .. } => 2 + 1 + 2 + 4 * truncated_frames(frames).len(),
            Self::ObjAllocStackTrace { frames, .. } => 2 + 8 + 2 + 4 * truncated_frames(frames).len(),
            Self::ObjLivenessStackTrace { frames, .. } => {
                2 + 8 + 8 + 2 + 4 * truncated_frames(frames).len()
            }
            Self::ObjGcHappened { .. } => 8,
            Self::ProfilePointHit { .. } => 2 + TIMESTAMP_BYTES + 2,
        }
    }

    /// Append the encoded event to `out`
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag() as u8);
        match self {
            Self::Method { method_id, timestamp, thread_cpu, .. } => {
                out.extend_from_slice(&method_id.to_be_bytes());
                put_timestamp(out, *timestamp);
                if let Some(cpu) = thread_cpu {
                    put_timestamp(out, *cpu);
                }
            }
            Self::Timestamp { timestamp, .. } => put_timestamp(out, *timestamp),
            Self::SetFollowingEventsThread { thread_id } | Self::ThreadInfoIdentical { thread_id } => {
                out.extend_from_slice(&thread_id.to_be_bytes());
            }
            Self::NewThread { thread_id, name } => {
                let name = truncated_name(name);
                out.extend_from_slice(&thread_id.to_be_bytes());
                out.extend_from_slice(&(name.len() as u16).to_be_bytes());
                out.extend_from_slice(name.as_bytes());
            }
            Self::ThreadDumpEnd | Self::ResetCollectors => {}
            Self::ThreadInfo { thread_id, status, frames } => {
                out.extend_from_slice(&thread_id.to_be_bytes());
                out.push(*status as u8);
                put_frames(out, frames);
            }
            Self::ObjAllocStackTrace { class_id, size, frames } => {
                out.extend_from_slice(&class_id.to_be_bytes());
                out.extend_from_slice(&size.to_be_bytes());
                put_frames(out, frames);
            }
            Self::ObjLivenessStackTrace { class_id, object_id, size, frames } => {
                out.extend_from_slice(&class_id.to_be_bytes());
                out.extend_from_slice(&object_id.to_be_bytes());
                out.extend_from_slice(&size.to_be_bytes());
                put_frames(out, frames);
            }
            Self::ObjGcHappened { object_id } => out.extend_from_slice(&object_id.to_be_bytes()),
            Self::ProfilePointHit { point_id, timestamp, thread_id } => {
                out.extend_from_slice(&point_id.to_be_bytes());
                put_timestamp(out, *timestamp);
                out.extend_from_slice(&thread_id.to_be_bytes());
            }
        }
    }

    /// Detach the event from the buffer it borrows from
    #[must_use]
    pub fn into_owned(self) -> Event<'static> {
        match self {
            Self::Method { tag, method_id, timestamp, thread_cpu } => {
                Event::Method { tag, method_id, timestamp, thread_cpu }
            }
            Self::Timestamp { tag, timestamp } => Event::Timestamp { tag, timestamp },
            Self::SetFollowingEventsThread { thread_id } => Event::SetFollowingEventsThread { thread_id },
            Self::NewThread { thread_id, name } => {
                Event::NewThread { thread_id, name: Cow::Owned(name.into_owned()) }
            }
            Self::ThreadDumpEnd => Event::ThreadDumpEnd,
            Self::ThreadInfoIdentical { thread_id } => Event::ThreadInfoIdentical { thread_id },
            Self::ThreadInfo { thread_id, status, frames } => {
                Event::ThreadInfo { thread_id, status, frames: Cow::Owned(frames.into_owned()) }
            }
            Self::ObjAllocStackTrace { class_id, size, frames } => {
                Event::ObjAllocStackTrace { class_id, size, frames: Cow::Owned(frames.into_owned()) }
            }
            Self::ObjLivenessStackTrace { class_id, object_id, size, frames } => {
                Event::ObjLivenessStackTrace {
                    class_id,
                    object_id,
                    size,
                    frames: Cow::Owned(frames.into_owned()),
                }
            }
            Self::ObjGcHappened { object_id } => Event::ObjGcHappened { object_id },
            Self::ProfilePointHit { point_id, timestamp, thread_id } => {
                Event::ProfilePointHit { point_id, timestamp, thread_id }
            }
            Self::ResetCollectors => Event::ResetCollectors,
        }
    }
}

fn put_timestamp(out: &mut Vec<u8>, timestamp: u64) {
    let bytes = (timestamp & TIMESTAMP_MASK).to_be_bytes();
    out.extend_from_slice(&bytes[8 - TIMESTAMP_BYTES..]);
}

#[allow(clippy::cast_possible_truncation)]
fn put_frames(out: &mut Vec<u8>, frames: &[u32]) {
    let frames = truncated_frames(frames);
    out.extend_from_slice(&(frames.len() as u16).to_be_bytes());
    for frame in frames {
        out.extend_from_slice(&frame.to_be_bytes());
    }
}

fn truncated_frames(frames: &[u32]) -> &[u32] {
    &frames[..frames.len().min(usize::from(u16::MAX))]
}

fn truncated_name(name: &str) -> &str {
    let max = usize::from(u16::MAX);
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

// ============================================================================
// Decoding
// ============================================================================

/// Iterator over the events packed in a byte slice
///
/// Decoding stops at the first error; the error is yielded once.
pub struct EventReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    config: WireConfig,
}

impl<'a> EventReader<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8], config: WireConfig) -> Self {
        Self { bytes, pos: 0, config }
    }

    /// Offset of the next undecoded byte
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize, tag: EventTag, offset: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(DecodeError::Truncated { tag, offset });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self, tag: EventTag, offset: usize) -> Result<u16, DecodeError> {
        let b = self.take(2, tag, offset)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u64(&mut self, tag: EventTag, offset: usize) -> Result<u64, DecodeError> {
        let b = self.take(8, tag, offset)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn timestamp(&mut self, tag: EventTag, offset: usize) -> Result<u64, DecodeError> {
        let b = self.take(TIMESTAMP_BYTES, tag, offset)?;
        let mut raw = [0u8; 8];
        raw[8 - TIMESTAMP_BYTES..].copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn frames(&mut self, tag: EventTag, offset: usize) -> Result<Vec<u32>, DecodeError> {
        let depth = usize::from(self.u16(tag, offset)?);
        let raw = self.take(depth * 4, tag, offset)?;
        Ok(raw
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn decode_one(&mut self) -> Result<Event<'static>, DecodeError> {
        let offset = self.pos;
        let raw_tag = self.bytes[offset];
        let tag = EventTag::try_from(raw_tag)
            .map_err(|tag| DecodeError::UnknownTag { tag, offset })?;
        self.pos += 1;

        if tag.is_method_event() {
            let method_id = self.u16(tag, offset)?;
            let timestamp = self.timestamp(tag, offset)?;
            let thread_cpu = if self.config.thread_cpu_timestamps {
                Some(self.timestamp(tag, offset)?)
            } else {
                None
            };
            return Ok(Event::Method { tag, method_id, timestamp, thread_cpu });
        }
        if tag.is_timestamp_event() {
            let timestamp = self.timestamp(tag, offset)?;
            return Ok(Event::Timestamp { tag, timestamp });
        }

        let event = match tag {
            EventTag::SetFollowingEventsThread => {
                Event::SetFollowingEventsThread { thread_id: self.u16(tag, offset)? }
            }
            EventTag::NewThread => {
                let thread_id = self.u16(tag, offset)?;
                let len = usize::from(self.u16(tag, offset)?);
                let raw = self.take(len, tag, offset)?;
                let name = std::str::from_utf8(raw)
                    .map_err(|_| DecodeError::InvalidName { offset })?
                    .to_owned();
                Event::NewThread { thread_id, name: Cow::Owned(name) }
            }
            EventTag::ThreadDumpEnd => Event::ThreadDumpEnd,
            EventTag::ThreadInfoIdentical => {
                Event::ThreadInfoIdentical { thread_id: self.u16(tag, offset)? }
            }
            EventTag::ThreadInfo => {
                let thread_id = self.u16(tag, offset)?;
                let raw_status = self.take(1, tag, offset)?[0];
                let status = ThreadStatus::try_from(raw_status)
                    .map_err(|status| DecodeError::InvalidStatus { status, offset })?;
                let frames = self.frames(tag, offset)?;
                Event::ThreadInfo { thread_id, status, frames: Cow::Owned(frames) }
            }
            EventTag::ObjAllocStackTrace => {
                let class_id = self.u16(tag, offset)?;
                let size = self.u64(tag, offset)?;
                let frames = self.frames(tag, offset)?;
                Event::ObjAllocStackTrace { class_id, size, frames: Cow::Owned(frames) }
            }
            EventTag::ObjLivenessStackTrace => {
                let class_id = self.u16(tag, offset)?;
                let object_id = self.u64(tag, offset)?;
                let size = self.u64(tag, offset)?;
                let frames = self.frames(tag, offset)?;
                Event::ObjLivenessStackTrace { class_id, object_id, size, frames: Cow::Owned(frames) }
            }
            EventTag::ObjGcHappened => Event::ObjGcHappened { object_id: self.u64(tag, offset)? },
            EventTag::ProfilePointHit => {
                let point_id = self.u16(tag, offset)?;
                let timestamp = self.timestamp(tag, offset)?;
                let thread_id = self.u16(tag, offset)?;
                Event::ProfilePointHit { point_id, timestamp, thread_id }
            }
            EventTag::ResetCollectors => Event::ResetCollectors,
            // Method and timestamp tags returned above
            _ => unreachable!("tag {tag:?} handled by grouped decoding"),
        };
        Ok(event)
    }
}

impl Iterator for EventReader<'_> {
    type Item = Result<Event<'static>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let result = self.decode_one();
        if result.is_err() {
            self.pos = self.bytes.len();
        }
        Some(result)
    }
}
