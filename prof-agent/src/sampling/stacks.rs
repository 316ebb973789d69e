//! Stack capture
//!
//! The runtime never walks native stacks itself. A [`StackWalker`] supplies
//! them: the host's stack service in production, [`ShadowStacks`] for code
//! that maintains its own frame stack (the synthetic workload, tests).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use prof_agent_common::ThreadStatus;

use crate::threads::ThreadToken;

/// Stack of one thread as seen by a single sampling tick
#[derive(Debug, Clone)]
pub struct ThreadStackSample {
    pub thread: Arc<ThreadToken>,
    pub status: ThreadStatus,
    /// Outermost frame first
    pub frames: Vec<u32>,
}

pub trait StackWalker: Send + Sync {
    /// Current stack of `thread`, innermost `max_depth` frames at most
    fn thread_stack(&self, thread: &ThreadToken, max_depth: usize) -> Vec<u32>;

    /// Stacks of all live threads, captured as one consistent snapshot
    fn all_thread_stacks(&self, max_depth: usize) -> Vec<ThreadStackSample>;
}

#[derive(Debug)]
struct ShadowStack {
    thread: Weak<ThreadToken>,
    status: ThreadStatus,
    frames: Vec<u32>,
}

fn innermost(frames: &[u32], max_depth: usize) -> Vec<u32> {
    frames[frames.len().saturating_sub(max_depth)..].to_vec()
}

/// Frame stacks maintained explicitly by the threads themselves
#[derive(Debug, Default)]
pub struct ShadowStacks {
    stacks: Mutex<HashMap<u64, ShadowStack>>,
}

impl ShadowStacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, thread: &Arc<ThreadToken>) {
        self.stacks.lock().entry(thread.serial()).or_insert_with(|| ShadowStack {
            thread: Arc::downgrade(thread),
            status: ThreadStatus::Running,
            frames: Vec::new(),
        });
    }

    pub fn unregister(&self, thread: &ThreadToken) {
        self.stacks.lock().remove(&thread.serial());
    }

    /// Push a frame, registering the thread if needed
    pub fn push(&self, thread: &Arc<ThreadToken>, frame: u32) {
        let mut stacks = self.stacks.lock();
        let stack = stacks.entry(thread.serial()).or_insert_with(|| ShadowStack {
            thread: Arc::downgrade(thread),
            status: ThreadStatus::Running,
            frames: Vec::new(),
        });
        stack.frames.push(frame);
    }

    pub fn pop(&self, thread: &ThreadToken) -> Option<u32> {
        self.stacks.lock().get_mut(&thread.serial()).and_then(|s| s.frames.pop())
    }

    pub fn set_status(&self, thread: &ThreadToken, status: ThreadStatus) {
        if let Some(stack) = self.stacks.lock().get_mut(&thread.serial()) {
            stack.status = status;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stacks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stacks.lock().is_empty()
    }
}

impl StackWalker for ShadowStacks {
    fn thread_stack(&self, thread: &ThreadToken, max_depth: usize) -> Vec<u32> {
        self.stacks
            .lock()
            .get(&thread.serial())
            .map(|s| innermost(&s.frames, max_depth))
            .unwrap_or_default()
    }

    fn all_thread_stacks(&self, max_depth: usize) -> Vec<ThreadStackSample> {
        let mut stacks = self.stacks.lock();
        stacks.retain(|_, s| s.thread.strong_count() > 0);
        let mut samples: Vec<_> = stacks
            .values()
            .filter_map(|s| {
                Some(ThreadStackSample {
                    thread: s.thread.upgrade()?,
                    status: s.status,
                    frames: innermost(&s.frames, max_depth),
                })
            })
            .collect();
        samples.sort_by_key(|s| s.thread.serial());
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_and_depth_limit() {
        let stacks = ShadowStacks::new();
        let t = ThreadToken::new("main");
        for frame in [1, 2, 3, 4] {
            stacks.push(&t, frame);
        }
        assert_eq!(stacks.thread_stack(&t, 2), vec![3, 4]);
        assert_eq!(stacks.pop(&t), Some(4));
        assert_eq!(stacks.thread_stack(&t, 10), vec![1, 2, 3]);
        assert!(stacks.thread_stack(&ThreadToken::new("other"), 10).is_empty());
    }

    #[test]
    fn test_snapshot_skips_dead_threads() {
        let stacks = ShadowStacks::new();
        let alive = ThreadToken::new("alive");
        let dead = ThreadToken::new("dead");
        stacks.push(&alive, 1);
        stacks.push(&dead, 2);
        stacks.set_status(&alive, ThreadStatus::Sleeping);
        drop(dead);

        let snapshot = stacks.all_thread_stacks(8);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].thread.name(), "alive");
        assert_eq!(snapshot[0].status, ThreadStatus::Sleeping);
        assert_eq!(stacks.len(), 1);
    }
}
