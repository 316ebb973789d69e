//! # Shared Wire Format (Agent ↔ Client Tool)
//!
//! Defines the byte-tagged event stream written by the agent runtime and read
//! by the client tool. Every event starts with a one-byte tag followed by a
//! fixed or length-prefixed payload. All multi-byte integers are big-endian.
//!
//! ## Layout Rules
//!
//! - Method, class, thread and profiling-point ids are 16 bits wide
//! - Timestamps are truncated to 56 bits and written as 7 bytes
//! - Stack frames are 32-bit method ids, preceded by a 16-bit depth
//! - Object ids and object sizes are 64 bits
//!
//! ## Key Types
//!
//! - [`Event`] - One decoded or to-be-encoded event
//! - [`EventTag`] - The tag byte
//! - [`ThreadStatus`] - Thread state byte carried by `THREAD_INFO`
//! - [`EventReader`] - Iterator decoding a byte slice into events

pub mod event;

pub use event::{DecodeError, Event, EventReader, WireConfig};

// ============================================================================
// Event Tag Constants
// ============================================================================

/// **Full instrumentation**: entry into an ordinary instrumented method
pub const METHOD_ENTRY: u8 = 1;

/// **Full instrumentation**: exit from an ordinary instrumented method
pub const METHOD_EXIT: u8 = 2;

/// **Full instrumentation**: entry into a root method (top of a profiled subtree)
pub const ROOT_ENTRY: u8 = 3;

/// **Full instrumentation**: exit from the root method
///
/// Paired with: `ROOT_ENTRY`
pub const ROOT_EXIT: u8 = 4;

/// **Full instrumentation**: entry into a marker method (e.g. a thread's run body)
pub const MARKER_ENTRY: u8 = 5;

/// **Full instrumentation**: exit from a marker method
pub const MARKER_EXIT: u8 = 6;

/// Thread started waiting on a condition
pub const WAIT_ENTRY: u8 = 7;
pub const WAIT_EXIT: u8 = 8;

/// Thread went to sleep
pub const SLEEP_ENTRY: u8 = 9;
pub const SLEEP_EXIT: u8 = 10;

/// Thread blocked on a contended monitor
pub const MONITOR_ENTRY: u8 = 11;
pub const MONITOR_EXIT: u8 = 12;

/// Thread parked
pub const PARK_ENTRY: u8 = 13;
pub const PARK_EXIT: u8 = 14;

/// All in-call-graph threads had their timers suspended
pub const THREADS_SUSPENDED: u8 = 15;

/// Timers resumed after `THREADS_SUSPENDED`
pub const THREADS_RESUMED: u8 = 16;

/// Every event up to the next occurrence of this tag belongs to the given thread
///
/// Written when a thread-local buffer is copied into the shared buffer.
pub const SET_FOLLOWING_EVENTS_THREAD: u8 = 17;

/// A thread was seen for the first time (id + name)
pub const NEW_THREAD: u8 = 18;

/// **Sampling**: start of one batch of thread stacks
pub const THREAD_DUMP_START: u8 = 19;

/// **Sampling**: end of the batch opened by `THREAD_DUMP_START`
pub const THREAD_DUMP_END: u8 = 20;

/// **Sampling**: thread state and stack unchanged since the previous batch
pub const THREAD_INFO_IDENTICAL: u8 = 21;

/// **Sampling**: full thread state and stack
pub const THREAD_INFO: u8 = 22;

/// **Memory**: sampled allocation with its stack trace
pub const OBJ_ALLOC_STACK_TRACE: u8 = 23;

/// **Memory**: sampled allocation tracked for liveness
pub const OBJ_LIVENESS_STACK_TRACE: u8 = 24;

/// **Memory**: a tracked object was reclaimed
pub const OBJ_GC_HAPPENED: u8 = 25;

/// A profiling point was reached
pub const PROFILE_POINT_HIT: u8 = 26;

/// Collectors were reset; the client should discard accumulated data
pub const RESET_COLLECTORS: u8 = 27;

/// Width of an encoded timestamp in bytes
pub const TIMESTAMP_BYTES: usize = 7;

/// Mask applied to timestamps before encoding them in 7 bytes
pub const TIMESTAMP_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

// ============================================================================
// Tag Enum
// ============================================================================

/// Typed view of an event tag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventTag {
    MethodEntry = METHOD_ENTRY,
    MethodExit = METHOD_EXIT,
    RootEntry = ROOT_ENTRY,
    RootExit = ROOT_EXIT,
    MarkerEntry = MARKER_ENTRY,
    MarkerExit = MARKER_EXIT,
    WaitEntry = WAIT_ENTRY,
    WaitExit = WAIT_EXIT,
    SleepEntry = SLEEP_ENTRY,
    SleepExit = SLEEP_EXIT,
    MonitorEntry = MONITOR_ENTRY,
    MonitorExit = MONITOR_EXIT,
    ParkEntry = PARK_ENTRY,
    ParkExit = PARK_EXIT,
    ThreadsSuspended = THREADS_SUSPENDED,
    ThreadsResumed = THREADS_RESUMED,
    SetFollowingEventsThread = SET_FOLLOWING_EVENTS_THREAD,
    NewThread = NEW_THREAD,
    ThreadDumpStart = THREAD_DUMP_START,
    ThreadDumpEnd = THREAD_DUMP_END,
    ThreadInfoIdentical = THREAD_INFO_IDENTICAL,
    ThreadInfo = THREAD_INFO,
    ObjAllocStackTrace = OBJ_ALLOC_STACK_TRACE,
    ObjLivenessStackTrace = OBJ_LIVENESS_STACK_TRACE,
    ObjGcHappened = OBJ_GC_HAPPENED,
    ProfilePointHit = PROFILE_POINT_HIT,
    ResetCollectors = RESET_COLLECTORS,
}

impl EventTag {
    /// Tags whose payload is `u16 method id + timestamp [+ thread CPU timestamp]`
    #[must_use]
    pub fn is_method_event(self) -> bool {
        matches!(
            self,
            Self::MethodEntry
                | Self::MethodExit
                | Self::RootEntry
                | Self::RootExit
                | Self::MarkerEntry
                | Self::MarkerExit
        )
    }

    /// Tags whose payload is a bare timestamp
    #[must_use]
    pub fn is_timestamp_event(self) -> bool {
        matches!(
            self,
            Self::WaitEntry
                | Self::WaitExit
                | Self::SleepEntry
                | Self::SleepExit
                | Self::MonitorEntry
                | Self::MonitorExit
                | Self::ParkEntry
                | Self::ParkExit
                | Self::ThreadsSuspended
                | Self::ThreadsResumed
                | Self::ThreadDumpStart
        )
    }
}

impl TryFrom<u8> for EventTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let tag = match value {
            METHOD_ENTRY => Self::MethodEntry,
            METHOD_EXIT => Self::MethodExit,
            ROOT_ENTRY => Self::RootEntry,
            ROOT_EXIT => Self::RootExit,
            MARKER_ENTRY => Self::MarkerEntry,
            MARKER_EXIT => Self::MarkerExit,
            WAIT_ENTRY => Self::WaitEntry,
            WAIT_EXIT => Self::WaitExit,
            SLEEP_ENTRY => Self::SleepEntry,
            SLEEP_EXIT => Self::SleepExit,
            MONITOR_ENTRY => Self::MonitorEntry,
            MONITOR_EXIT => Self::MonitorExit,
            PARK_ENTRY => Self::ParkEntry,
            PARK_EXIT => Self::ParkExit,
            THREADS_SUSPENDED => Self::ThreadsSuspended,
            THREADS_RESUMED => Self::ThreadsResumed,
            SET_FOLLOWING_EVENTS_THREAD => Self::SetFollowingEventsThread,
            NEW_THREAD => Self::NewThread,
            THREAD_DUMP_START => Self::ThreadDumpStart,
            THREAD_DUMP_END => Self::ThreadDumpEnd,
            THREAD_INFO_IDENTICAL => Self::ThreadInfoIdentical,
            THREAD_INFO => Self::ThreadInfo,
            OBJ_ALLOC_STACK_TRACE => Self::ObjAllocStackTrace,
            OBJ_LIVENESS_STACK_TRACE => Self::ObjLivenessStackTrace,
            OBJ_GC_HAPPENED => Self::ObjGcHappened,
            PROFILE_POINT_HIT => Self::ProfilePointHit,
            RESET_COLLECTORS => Self::ResetCollectors,
            other => return Err(other),
        };
        Ok(tag)
    }
}

// ============================================================================
// Thread Status
// ============================================================================

/// Thread state reported by the stack walker
///
/// The numeric values are part of the wire format (`THREAD_INFO` status byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ThreadStatus {
    /// Thread has terminated
    Zombie = 0,
    /// Thread is runnable
    #[default]
    Running = 1,
    /// Thread is in a timed sleep
    Sleeping = 2,
    /// Thread is blocked entering a monitor
    Monitor = 3,
    /// Thread is waiting on a condition
    Wait = 4,
    /// Thread is parked
    Park = 5,
}

impl TryFrom<u8> for ThreadStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Zombie),
            1 => Ok(Self::Running),
            2 => Ok(Self::Sleeping),
            3 => Ok(Self::Monitor),
            4 => Ok(Self::Wait),
            5 => Ok(Self::Park),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trips_through_u8() {
        for value in METHOD_ENTRY..=RESET_COLLECTORS {
            let tag = EventTag::try_from(value).expect("every value in range is a tag");
            assert_eq!(tag as u8, value);
        }
        assert_eq!(EventTag::try_from(0), Err(0));
        assert_eq!(EventTag::try_from(200), Err(200));
    }

    #[test]
    fn test_method_and_timestamp_groups_are_disjoint() {
        for value in METHOD_ENTRY..=RESET_COLLECTORS {
            let tag = EventTag::try_from(value).unwrap();
            assert!(!(tag.is_method_event() && tag.is_timestamp_event()));
        }
        assert!(EventTag::RootExit.is_method_event());
        assert!(EventTag::ThreadDumpStart.is_timestamp_event());
        assert!(!EventTag::ThreadDumpEnd.is_timestamp_event());
    }

    #[test]
    fn test_thread_status_values() {
        assert_eq!(ThreadStatus::Park as u8, 5);
        assert_eq!(ThreadStatus::try_from(3), Ok(ThreadStatus::Monitor));
        assert!(ThreadStatus::try_from(6).is_err());
    }
}
