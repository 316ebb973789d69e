//! Remote transport
//!
//! When the client tool attaches over a socket there is no shared file: each
//! dump is framed as a 4-byte big-endian length followed by the raw bytes.

use std::io::{self, Read, Write};

/// Destination of dumps when the buffer is not shared through a file
pub trait RemoteTransport: Send {
    /// Deliver one complete chunk
    ///
    /// # Errors
    /// Returns the underlying I/O error; the chunk is lost
    fn send(&mut self, chunk: &[u8]) -> io::Result<()>;
}

/// Length-prefixed frames over any writer (`TcpStream`, file, `Vec<u8>`)
#[derive(Debug)]
pub struct StreamTransport<W: Write + Send> {
    writer: W,
    frames: u64,
}

impl<W: Write + Send> StreamTransport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, frames: 0 }
    }

    /// Frames sent so far
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> RemoteTransport for StreamTransport<W> {
    fn send(&mut self, chunk: &[u8]) -> io::Result<()> {
        let len = u32::try_from(chunk.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk exceeds 4 GiB"))?;
        self.writer.write_all(&len.to_be_bytes())?;
        self.writer.write_all(chunk)?;
        self.writer.flush()?;
        self.frames += 1;
        Ok(())
    }
}

/// Read one frame written by [`StreamTransport`]
///
/// Returns `Ok(None)` on a clean end of stream between frames.
///
/// # Errors
/// Returns an error if the stream ends inside a frame or cannot be read
pub fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let mut frame = vec![0u8; u32::from_be_bytes(len) as usize];
    reader.read_exact(&mut frame)?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_length_prefixed() {
        let mut transport = StreamTransport::new(Vec::new());
        transport.send(&[1, 2, 3]).unwrap();
        transport.send(&[]).unwrap();
        assert_eq!(transport.frames(), 2);

        let bytes = transport.into_inner();
        assert_eq!(bytes, vec![0, 0, 0, 3, 1, 2, 3, 0, 0, 0, 0]);

        let mut cursor = io::Cursor::new(bytes);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(vec![]));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut cursor = io::Cursor::new(vec![0, 0, 0, 9, 1]);
        assert!(read_frame(&mut cursor).is_err());
    }
}
