//! Shared setup for the integration tests

#![allow(dead_code)]

use crossbeam_channel::Receiver;
use std::sync::Arc;

use prof_agent::buffer::{ChannelConsumer, DumpedChunk};
use prof_agent::config::RuntimeConfig;
use prof_agent::export::Recording;
use prof_agent::runtime::{ProfilerRuntime, RuntimeBuilder};
use prof_agent::timers::ManualClock;

pub struct Harness {
    pub runtime: Arc<ProfilerRuntime>,
    pub clock: Arc<ManualClock>,
    pub rx: Receiver<DumpedChunk>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with(config, |b| b)
    }

    pub fn with(config: RuntimeConfig, customize: impl FnOnce(RuntimeBuilder) -> RuntimeBuilder) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (consumer, rx) = ChannelConsumer::unbounded();
        let clock = Arc::new(ManualClock::new(1_000, 10));
        let config = RuntimeConfig { buffer_dir: Some(dir.path().to_path_buf()), ..config };
        let builder = ProfilerRuntime::builder(config).consumer(consumer).clock(clock.clone());
        let runtime = customize(builder).build().expect("Failed to build runtime");
        Self { runtime, clock, rx, dir }
    }

    /// Dump everything and decode what the consumer received so far
    pub fn recording(&self) -> Recording {
        self.runtime.dump_existing_results();
        let mut recording = Recording::new(self.runtime.config().wire_config());
        for chunk in self.rx.try_iter() {
            recording.push_chunk(&chunk.bytes).expect("Failed to decode chunk");
        }
        recording
    }
}
