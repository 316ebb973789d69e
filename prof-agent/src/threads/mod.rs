//! Thread bookkeeping
//!
//! - `token`: identity and liveness of application threads
//! - `record`: per-thread profiling state (`ThreadInfo` equivalent)
//! - `registry`: open-addressing table from threads to records
//! - `server_threads`: threads owned by the profiler itself

pub mod record;
pub mod registry;
pub mod server_threads;
pub mod token;

pub use record::{RuntimeGuard, ThreadRecord, ThreadState};
pub use registry::ThreadRegistry;
pub use server_threads::{ServerThreadGuard, ServerThreads};
pub use token::ThreadToken;
