//! Blocking-call hooks
//!
//! Time a thread spends waiting, sleeping, contending for a monitor or parked
//! is not CPU time. The host reports those calls through [`BlockingHooks`];
//! each CPU runtime decides what to do with them.

use std::sync::Arc;

use prof_agent_common::EventTag;

use crate::threads::ThreadToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockingKind {
    Wait,
    Sleep,
    Monitor,
    Park,
}

impl BlockingKind {
    pub const ALL: [Self; 4] = [Self::Wait, Self::Sleep, Self::Monitor, Self::Park];

    #[must_use]
    pub fn entry_tag(self) -> EventTag {
        match self {
            Self::Wait => EventTag::WaitEntry,
            Self::Sleep => EventTag::SleepEntry,
            Self::Monitor => EventTag::MonitorEntry,
            Self::Park => EventTag::ParkEntry,
        }
    }

    #[must_use]
    pub fn exit_tag(self) -> EventTag {
        match self {
            Self::Wait => EventTag::WaitExit,
            Self::Sleep => EventTag::SleepExit,
            Self::Monitor => EventTag::MonitorExit,
            Self::Park => EventTag::ParkExit,
        }
    }
}

pub trait BlockingHooks {
    fn blocking_entry_on(&self, thread: &Arc<ThreadToken>, kind: BlockingKind);

    fn blocking_exit_on(&self, thread: &Arc<ThreadToken>, kind: BlockingKind);

    /// [`Self::blocking_entry_on`] for the calling thread
    fn blocking_entry(&self, kind: BlockingKind) {
        ThreadToken::with_current(|t| self.blocking_entry_on(t, kind));
    }

    /// [`Self::blocking_exit_on`] for the calling thread
    fn blocking_exit(&self, kind: BlockingKind) {
        ThreadToken::with_current(|t| self.blocking_exit_on(t, kind));
    }
}
