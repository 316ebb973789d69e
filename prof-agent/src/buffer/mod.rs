//! Event buffers and their hand-off to the client tool

pub mod consumer;
pub mod event_buffer;
pub mod manager;
pub mod transport;

pub use consumer::{BufferConsumer, BufferDump, ChannelConsumer, DumpedChunk, NullConsumer};
pub use event_buffer::EventBuffer;
pub use manager::{EventBufferManager, Transport};
pub use transport::{read_frame, RemoteTransport, StreamTransport};
