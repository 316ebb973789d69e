//! Offline views of a recorded event stream
//!
//! A recording is the sequence of dumped buffers, each stored as a
//! length-prefixed frame. [`Recording`] decodes it and attributes every event
//! to its thread; [`ChromeTraceExporter`] turns it into Chrome Trace Event
//! JSON for Perfetto or `chrome://tracing`.

pub mod chrome_trace;
pub mod event_display;
pub mod recording;

pub use chrome_trace::ChromeTraceExporter;
pub use event_display::{display_recording, format_event};
pub use recording::{Recording, ThreadEvent};
