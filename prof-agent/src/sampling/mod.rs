//! Time-sliced stack sampling
//!
//! [`SamplingThread`] is the periodic engine (also reused by the reference
//! manager), [`StackSampler`] the task that turns stack snapshots into thread
//! dumps.

pub mod interval;
pub mod sampler;
pub mod sampling_thread;
pub mod stacks;

pub use interval::{IntervalCorrector, VIOLATION_THRESHOLD};
pub use sampler::StackSampler;
pub use sampling_thread::{FnTask, SampleTask, SamplingThread};
pub use stacks::{ShadowStacks, StackWalker, ThreadStackSample};
