//! Heap dump profiling point
//!
//! A hit suspends timing for all threads, writes `heapdump-<timestamp>.json`
//! into the configured directory, resumes timing and finally records the hit
//! like the default handler does.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::HandlerError;
use crate::memory::{HeapSnapshot, HeapSource};
use crate::runtime::ProfilerRuntime;
use crate::threads::ThreadRecord;

use super::handler::{DefaultHandler, HandlerContext, PointHit, ProfilingPointHandler};

/// Writes a heap dump to a file
pub trait HeapDumper: Send + Sync {
    /// # Errors
    /// Returns [`HandlerError::HeapDumpFailed`] if the file cannot be written
    fn dump(&self, path: &Path, timestamp: u64) -> Result<(), HandlerError>;
}

/// Dumps what the memory runtimes know as JSON
pub struct JsonHeapDumper {
    sources: Vec<Arc<dyn HeapSource>>,
}

impl JsonHeapDumper {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn HeapSource>>) -> Self {
        Self { sources }
    }

    #[must_use]
    pub fn snapshot(&self, timestamp: u64) -> HeapSnapshot {
        let mut snapshot = HeapSnapshot { timestamp, ..HeapSnapshot::default() };
        for source in &self.sources {
            source.contribute(&mut snapshot);
        }
        snapshot
    }
}

impl HeapDumper for JsonHeapDumper {
    fn dump(&self, path: &Path, timestamp: u64) -> Result<(), HandlerError> {
        let failed = |source: std::io::Error| HandlerError::HeapDumpFailed {
            path: path.to_path_buf(),
            source,
        };
        let snapshot = self.snapshot(timestamp);
        let mut writer = BufWriter::new(File::create(path).map_err(failed)?);
        serde_json::to_writer_pretty(&mut writer, &snapshot)
            .map_err(|e| failed(std::io::Error::from(e)))?;
        writer.flush().map_err(failed)
    }
}

pub struct HeapDumpHandler {
    runtime: Arc<ProfilerRuntime>,
    dir: PathBuf,
    dumper: Arc<dyn HeapDumper>,
    recorder: DefaultHandler,
}

impl std::fmt::Debug for HeapDumpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapDumpHandler").field("dir", &self.dir).finish_non_exhaustive()
    }
}

impl HeapDumpHandler {
    #[must_use]
    pub fn new(runtime: Arc<ProfilerRuntime>, dir: PathBuf, dumper: Arc<dyn HeapDumper>) -> Self {
        let recorder = DefaultHandler::new(Arc::clone(&runtime));
        Self { runtime, dir, dumper, recorder }
    }

    /// `info` names the dump directory; empty means the system temp dir
    ///
    /// # Errors
    /// Returns [`HandlerError::InvalidInfo`] if the directory does not exist
    pub fn create(
        ctx: &HandlerContext,
        info: &str,
    ) -> Result<Arc<dyn ProfilingPointHandler>, HandlerError> {
        let dir = if info.trim().is_empty() { std::env::temp_dir() } else { PathBuf::from(info) };
        if !dir.is_dir() {
            return Err(HandlerError::InvalidInfo {
                kind: "heapdump".to_string(),
                info: info.to_string(),
                reason: "not a directory".to_string(),
            });
        }
        Ok(Arc::new(Self::new(Arc::clone(&ctx.runtime), dir, Arc::clone(&ctx.heap_dumper))))
    }

    #[must_use]
    pub fn dump_path(&self, timestamp: u64) -> PathBuf {
        self.dir.join(format!("heapdump-{timestamp}.json"))
    }
}

impl ProfilingPointHandler for HeapDumpHandler {
    fn profile_point_hit(&self, record: &ThreadRecord, hit: &PointHit) {
        let path = self.dump_path(hit.timestamp);
        self.runtime.suspend_active_timers();
        match self.dumper.dump(&path, hit.timestamp) {
            Ok(()) => log::info!("Heap dump written to {}", path.display()),
            Err(e) => log::error!("{e}"),
        }
        self.runtime.resume_active_timers();
        self.recorder.profile_point_hit(record, hit);
    }
}
