//! # Event buffer manager
//!
//! Hands full buffers over to the client tool.
//!
//! - **Local**: a temporary file mapped read/write; each dump is copied to the
//!   start of the mapping and the consumer is told to read it. The file path
//!   travels with the first notification only.
//! - **Remote**: no file; each dump goes through a [`RemoteTransport`].
//!
//! The mapping is released explicitly by [`EventBufferManager::free_buffer_file`]
//! (or on drop), which also deletes the file.

#![allow(unsafe_code)] // memmap2::MmapMut::map_mut() requires unsafe

use memmap2::MmapMut;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{BufferConsumer, BufferDump, RemoteTransport};
use crate::domain::BufferError;

pub enum Transport {
    Local,
    Remote(Box<dyn RemoteTransport>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("Local"),
            Self::Remote(_) => f.write_str("Remote"),
        }
    }
}

struct MappedFile {
    // Field order matters: unmap before the file is closed and deleted
    map: MmapMut,
    file: NamedTempFile,
}

pub struct EventBufferManager {
    transport: Transport,
    consumer: Box<dyn BufferConsumer>,
    dir: Option<PathBuf>,
    mapped: Option<MappedFile>,
    name_sent: bool,
    dumps: u64,
    bytes_dumped: u64,
}

impl std::fmt::Debug for EventBufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBufferManager")
            .field("transport", &self.transport)
            .field("buffer_file", &self.buffer_file_path())
            .field("dumps", &self.dumps)
            .finish_non_exhaustive()
    }
}

impl EventBufferManager {
    pub fn new(transport: Transport, consumer: Box<dyn BufferConsumer>, dir: Option<PathBuf>) -> Self {
        Self { transport, consumer, dir, mapped: None, name_sent: false, dumps: 0, bytes_dumped: 0 }
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self.transport, Transport::Remote(_))
    }

    /// Create and map the buffer file; no-op when already open or remote
    ///
    /// # Errors
    /// Returns an error if the file cannot be created, sized, or mapped
    pub fn open_buffer_file(&mut self, size: usize) -> Result<(), BufferError> {
        if self.is_remote() || self.mapped.is_some() {
            return Ok(());
        }

        let dir = self.dir.clone().unwrap_or_else(std::env::temp_dir);
        let file = tempfile::Builder::new()
            .prefix("prof-agent-buf-")
            .tempfile_in(&dir)
            .map_err(|source| BufferError::CreateFailed { dir: dir.clone(), source })?;
        let path = file.path().to_path_buf();

        file.as_file()
            .set_len(size as u64)
            .map_err(|source| BufferError::ResizeFailed { path: path.clone(), size, source })?;

        // SAFETY: the file was just created by us, is sized to `size`, and is
        // never truncated while the mapping lives
        let map = unsafe { MmapMut::map_mut(file.as_file()) }
            .map_err(|source| BufferError::MapFailed { path: path.clone(), source })?;

        set_world_accessible(&path);

        log::info!("Buffer file {} mapped ({size} bytes)", path.display());
        self.mapped = Some(MappedFile { map, file });
        self.name_sent = false;
        Ok(())
    }

    /// Path of the mapped buffer file, if open
    #[must_use]
    pub fn buffer_file_path(&self) -> Option<&Path> {
        self.mapped.as_ref().map(|m| m.file.path())
    }

    /// Hand `buffer[start..cur]` to the client and notify the consumer
    ///
    /// # Errors
    /// Returns an error if the range is invalid, the file is not open, the
    /// chunk is larger than the mapping, or the remote transport fails
    pub fn event_buffer_dump_hook(
        &mut self,
        buffer: &[u8],
        start: usize,
        cur: usize,
    ) -> Result<(), BufferError> {
        if start > cur || cur > buffer.len() {
            return Err(BufferError::InvalidRange { start, end: cur, len: buffer.len() });
        }
        let chunk = &buffer[start..cur];

        match &mut self.transport {
            Transport::Remote(remote) => {
                remote.send(chunk).map_err(BufferError::Transport)?;
                self.consumer.buffer_dumped(BufferDump { bytes: chunk, buffer_name: None });
            }
            Transport::Local => {
                let mapped = self.mapped.as_mut().ok_or(BufferError::NotOpen)?;
                if chunk.len() > mapped.map.len() {
                    return Err(BufferError::ChunkTooLarge {
                        len: chunk.len(),
                        capacity: mapped.map.len(),
                    });
                }
                mapped.map[..chunk.len()].copy_from_slice(chunk);
                let buffer_name = (!self.name_sent).then(|| mapped.file.path());
                self.consumer
                    .buffer_dumped(BufferDump { bytes: &mapped.map[..chunk.len()], buffer_name });
                self.name_sent = true;
            }
        }

        self.dumps += 1;
        self.bytes_dumped += chunk.len() as u64;
        log::debug!("Dumped {} bytes (dump #{})", chunk.len(), self.dumps);
        Ok(())
    }

    /// Unmap, close and delete the buffer file
    pub fn free_buffer_file(&mut self) {
        if let Some(MappedFile { map, file }) = self.mapped.take() {
            drop(map);
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                log::warn!("Failed to delete buffer file {}: {e}", path.display());
            } else {
                log::info!("Buffer file {} released", path.display());
            }
        }
    }

    #[must_use]
    pub fn dumps(&self) -> u64 {
        self.dumps
    }

    #[must_use]
    pub fn bytes_dumped(&self) -> u64 {
        self.bytes_dumped
    }
}

impl Drop for EventBufferManager {
    fn drop(&mut self) {
        self.free_buffer_file();
    }
}

/// Let a client running as another user open the file; failure only limits who can attach
#[cfg(unix)]
fn set_world_accessible(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)) {
        log::warn!("Could not make {} readable by other users: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn set_world_accessible(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ChannelConsumer, DumpedChunk, StreamTransport};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn local_manager(dir: &Path) -> (EventBufferManager, crossbeam_channel::Receiver<DumpedChunk>) {
        let (consumer, rx) = ChannelConsumer::unbounded();
        let manager =
            EventBufferManager::new(Transport::Local, Box::new(consumer), Some(dir.to_path_buf()));
        (manager, rx)
    }

    #[test]
    fn test_local_dump_sends_name_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, rx) = local_manager(dir.path());
        manager.open_buffer_file(64).unwrap();
        manager.open_buffer_file(64).unwrap();
        let path = manager.buffer_file_path().unwrap().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);

        manager.event_buffer_dump_hook(&[9, 8, 7, 6], 1, 3).unwrap();
        manager.event_buffer_dump_hook(&[5, 4], 0, 2).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.bytes, vec![8, 7]);
        assert_eq!(first.buffer_name.as_deref(), Some(path.as_path()));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.bytes, vec![5, 4]);
        assert!(second.buffer_name.is_none());

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(&on_disk[..2], &[5, 4]);
        assert_eq!(manager.dumps(), 2);
        assert_eq!(manager.bytes_dumped(), 4);
    }

    #[test]
    fn test_free_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, _rx) = local_manager(dir.path());
        manager.open_buffer_file(16).unwrap();
        let path = manager.buffer_file_path().unwrap().to_path_buf();
        manager.free_buffer_file();
        assert!(!path.exists());
        assert!(matches!(
            manager.event_buffer_dump_hook(&[1], 0, 1),
            Err(BufferError::NotOpen)
        ));
    }

    #[test]
    fn test_rejects_bad_range_and_oversize_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, _rx) = local_manager(dir.path());
        manager.open_buffer_file(4).unwrap();
        assert!(matches!(
            manager.event_buffer_dump_hook(&[1, 2], 2, 1),
            Err(BufferError::InvalidRange { .. })
        ));
        assert!(matches!(
            manager.event_buffer_dump_hook(&[0; 8], 0, 8),
            Err(BufferError::ChunkTooLarge { len: 8, capacity: 4 })
        ));
    }

    #[test]
    fn test_missing_dir_reports_path() {
        let (consumer, _rx) = ChannelConsumer::unbounded();
        let mut manager = EventBufferManager::new(
            Transport::Local,
            Box::new(consumer),
            Some(PathBuf::from("/nonexistent/prof-agent")),
        );
        let err = manager.open_buffer_file(16).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/prof-agent"));
    }

    #[test]
    fn test_remote_dump_is_framed() {
        let sink = SharedSink::default();
        let (consumer, rx) = ChannelConsumer::unbounded();
        let mut manager = EventBufferManager::new(
            Transport::Remote(Box::new(StreamTransport::new(sink.clone()))),
            Box::new(consumer),
            None,
        );
        manager.open_buffer_file(1024).unwrap();
        assert!(manager.buffer_file_path().is_none());

        manager.event_buffer_dump_hook(&[1, 2, 3], 0, 3).unwrap();
        assert_eq!(*sink.0.lock().unwrap(), vec![0, 0, 0, 3, 1, 2, 3]);
        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk.bytes, vec![1, 2, 3]);
        assert!(chunk.buffer_name.is_none());
    }
}
