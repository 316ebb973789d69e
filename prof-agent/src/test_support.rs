//! Helpers shared by unit tests

use crossbeam_channel::Receiver;
use std::sync::Arc;

use prof_agent_common::{Event, EventReader, EventTag};

use crate::buffer::{ChannelConsumer, DumpedChunk};
use crate::config::RuntimeConfig;
use crate::runtime::{ProfilerRuntime, RuntimeBuilder};
use crate::timers::ManualClock;

/// Runtime on a manual clock whose dumps land in a channel
pub struct Capture {
    pub runtime: Arc<ProfilerRuntime>,
    pub clock: Arc<ManualClock>,
    rx: Receiver<DumpedChunk>,
    _dir: tempfile::TempDir,
}

impl Capture {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with(config, |b| b)
    }

    pub fn with(config: RuntimeConfig, customize: impl FnOnce(RuntimeBuilder) -> RuntimeBuilder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (consumer, rx) = ChannelConsumer::unbounded();
        let clock = Arc::new(ManualClock::new(1_000, 10));
        let config = RuntimeConfig { buffer_dir: Some(dir.path().to_path_buf()), ..config };
        let builder = ProfilerRuntime::builder(config).consumer(consumer).clock(clock.clone());
        let runtime = customize(builder).build().unwrap();
        Self { runtime, clock, rx, _dir: dir }
    }

    /// Flush everything and decode what was dumped since the last call
    pub fn events(&self) -> Vec<Event<'static>> {
        self.runtime.dump_existing_results();
        let wire = self.runtime.config().wire_config();
        self.rx
            .try_iter()
            .flat_map(|chunk| {
                EventReader::new(&chunk.bytes, wire).map(Result::unwrap).collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn tags(&self) -> Vec<EventTag> {
        self.events().iter().map(Event::tag).collect()
    }
}
