//! Dump notifications
//!
//! The client tool learns about new data through a [`BufferConsumer`]. In the
//! CLI that is a [`ChannelConsumer`] feeding the async main loop.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One notification from the buffer manager
#[derive(Debug, Clone, Copy)]
pub struct BufferDump<'a> {
    /// The dumped bytes (a view of the mapped file for the local transport)
    pub bytes: &'a [u8],
    /// Path of the buffer file; only set on the first notification
    pub buffer_name: Option<&'a Path>,
}

pub trait BufferConsumer: Send {
    /// Called with the buffer manager lock held; must not call back into the runtime
    fn buffer_dumped(&mut self, dump: BufferDump<'_>);
}

/// Owned copy of a [`BufferDump`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpedChunk {
    pub bytes: Vec<u8>,
    pub buffer_name: Option<PathBuf>,
}

/// Forwards every dump into a bounded channel without blocking
///
/// A full channel drops the chunk and counts it.
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: Sender<DumpedChunk>,
    dropped: Arc<AtomicU64>,
}

impl ChannelConsumer {
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<DumpedChunk>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx, dropped: Arc::new(AtomicU64::new(0)) }, rx)
    }

    #[must_use]
    pub fn unbounded() -> (Self, Receiver<DumpedChunk>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx, dropped: Arc::new(AtomicU64::new(0)) }, rx)
    }

    /// Shared counter of chunks dropped because the receiver lagged
    #[must_use]
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl BufferConsumer for ChannelConsumer {
    fn buffer_dumped(&mut self, dump: BufferDump<'_>) {
        let chunk = DumpedChunk {
            bytes: dump.bytes.to_vec(),
            buffer_name: dump.buffer_name.map(Path::to_path_buf),
        };
        match self.tx.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    log::warn!("Dump channel full, {dropped} chunks dropped so far");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Discards every dump
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsumer;

impl BufferConsumer for NullConsumer {
    fn buffer_dumped(&mut self, _dump: BufferDump<'_>) {}
}
