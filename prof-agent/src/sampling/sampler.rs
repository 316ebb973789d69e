//! # Stack sampler
//!
//! Each tick writes one thread dump into the shared buffer:
//!
//! ```text
//! NEW_THREAD ...               threads never announced before
//! THREAD_DUMP_START ts
//!   THREAD_INFO_IDENTICAL t    stack and status unchanged since last tick
//!   THREAD_INFO t status ...   anything else
//! THREAD_DUMP_END
//! ```
//!
//! Thread ids are the registry ids, so sampled and instrumented events of the
//! same thread agree.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use prof_agent_common::{Event, EventTag, ThreadStatus};

use super::sampling_thread::SampleTask;
use super::stacks::StackWalker;
use crate::domain::ThreadId;
use crate::runtime::ProfilerRuntime;

#[derive(Debug, PartialEq, Eq)]
struct LastSample {
    serial: u64,
    status: ThreadStatus,
    frames: Vec<u32>,
}

pub struct StackSampler {
    runtime: Arc<ProfilerRuntime>,
    walker: Arc<dyn StackWalker>,
    /// Keyed by thread id; the serial tells a reused id from the same thread
    previous: HashMap<ThreadId, LastSample>,
    dumps: u64,
}

impl std::fmt::Debug for StackSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackSampler")
            .field("threads", &self.previous.len())
            .field("dumps", &self.dumps)
            .finish_non_exhaustive()
    }
}

impl StackSampler {
    /// Sampler over the runtime's own stack walker
    #[must_use]
    pub fn new(runtime: Arc<ProfilerRuntime>) -> Self {
        let walker = Arc::clone(runtime.stack_walker());
        Self::with_walker(runtime, walker)
    }

    #[must_use]
    pub fn with_walker(runtime: Arc<ProfilerRuntime>, walker: Arc<dyn StackWalker>) -> Self {
        Self { runtime, walker, previous: HashMap::new(), dumps: 0 }
    }

    /// Take one sample of every thread
    pub fn sample(&mut self) {
        if self.runtime.take_sampler_reset() {
            self.runtime.with_sink(|_| self.previous.clear());
        }

        let snapshot = self.walker.all_thread_stacks(self.runtime.config().max_stack_depth);
        let server_threads = self.runtime.server_threads();
        let samples: Vec<_> = snapshot
            .into_iter()
            .filter(|s| !server_threads.is_server_thread(&s.thread))
            .map(|s| (self.runtime.record_for(&s.thread).thread_id(), s))
            .collect();

        let timestamp = self.runtime.now();
        let previous = &mut self.previous;
        self.runtime.with_sink(|sink| {
            for (id, sample) in &samples {
                let announced = previous.get(id).is_some_and(|p| p.serial == sample.thread.serial());
                if !announced {
                    previous.remove(id);
                    sink.write(
                        None,
                        &Event::NewThread { thread_id: id.0, name: sample.thread.name().into() },
                    );
                }
            }

            sink.write(None, &Event::Timestamp { tag: EventTag::ThreadDumpStart, timestamp });
            for (id, sample) in &samples {
                let current = LastSample {
                    serial: sample.thread.serial(),
                    status: sample.status,
                    frames: sample.frames.clone(),
                };
                if previous.get(id) == Some(&current) {
                    sink.write(None, &Event::ThreadInfoIdentical { thread_id: id.0 });
                } else {
                    sink.write(
                        None,
                        &Event::ThreadInfo {
                            thread_id: id.0,
                            status: sample.status,
                            frames: Cow::Borrowed(&sample.frames),
                        },
                    );
                    previous.insert(*id, current);
                }
            }
            sink.write(None, &Event::ThreadDumpEnd);
        });

        self.previous.retain(|id, _| samples.iter().any(|(sampled, _)| sampled == id));
        self.dumps += 1;
    }

    /// Thread dumps written so far
    #[must_use]
    pub fn dumps(&self) -> u64 {
        self.dumps
    }
}

impl SampleTask for StackSampler {
    fn sample(&mut self) {
        StackSampler::sample(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::sampling::ShadowStacks;
    use crate::test_support::Capture;
    use crate::threads::ThreadToken;

    fn setup() -> (Capture, Arc<ShadowStacks>, StackSampler) {
        let stacks = Arc::new(ShadowStacks::new());
        let walker: Arc<dyn StackWalker> = stacks.clone();
        let capture = Capture::with(RuntimeConfig::default(), |b| b.stack_walker(walker));
        let sampler = StackSampler::new(capture.runtime.clone());
        (capture, stacks, sampler)
    }

    #[test]
    fn test_first_dump_announces_and_sends_full_info() {
        let (capture, stacks, mut sampler) = setup();
        let t = ThreadToken::new("worker");
        stacks.push(&t, 10);
        stacks.push(&t, 11);
        sampler.sample();

        let id = capture.runtime.record_for(&t).thread_id().0;
        let events = capture.events();
        assert_eq!(events[0], Event::NewThread { thread_id: id, name: "worker".into() });
        assert_eq!(events[1].tag(), EventTag::ThreadDumpStart);
        assert_eq!(
            events[2],
            Event::ThreadInfo {
                thread_id: id,
                status: ThreadStatus::Running,
                frames: vec![10, 11].into()
            }
        );
        assert_eq!(events[3], Event::ThreadDumpEnd);
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_unchanged_stack_is_identical() {
        let (capture, stacks, mut sampler) = setup();
        let a = ThreadToken::new("a");
        let b = ThreadToken::new("b");
        stacks.push(&a, 1);
        stacks.push(&b, 2);
        sampler.sample();
        capture.events();

        stacks.push(&b, 3);
        sampler.sample();
        let tags = capture.tags();
        assert_eq!(
            tags,
            vec![
                EventTag::ThreadDumpStart,
                EventTag::ThreadInfoIdentical,
                EventTag::ThreadInfo,
                EventTag::ThreadDumpEnd
            ]
        );

        stacks.set_status(&a, ThreadStatus::Wait);
        sampler.sample();
        let events = capture.events();
        assert!(matches!(events[1], Event::ThreadInfo { status: ThreadStatus::Wait, .. }));
        assert!(matches!(events[2], Event::ThreadInfoIdentical { .. }));
        assert_eq!(sampler.dumps(), 3);
    }

    #[test]
    fn test_reset_forgets_previous_stacks() {
        let (capture, stacks, mut sampler) = setup();
        let t = ThreadToken::new("t");
        stacks.push(&t, 1);
        sampler.sample();
        capture.runtime.reset_collectors();
        sampler.sample();

        let tags = capture.tags();
        assert_eq!(
            tags,
            vec![
                EventTag::ResetCollectors,
                EventTag::NewThread,
                EventTag::ThreadDumpStart,
                EventTag::ThreadInfo,
                EventTag::ThreadDumpEnd
            ]
        );
    }

    #[test]
    fn test_vanished_thread_is_dropped() {
        let (capture, stacks, mut sampler) = setup();
        let t = ThreadToken::new("t");
        stacks.push(&t, 1);
        sampler.sample();
        drop(t);
        sampler.sample();
        let tags = capture.tags();
        assert_eq!(tags.iter().filter(|t| **t == EventTag::ThreadInfo).count(), 1);
        assert_eq!(tags.last(), Some(&EventTag::ThreadDumpEnd));
        assert!(sampler.previous.is_empty());
    }
}
