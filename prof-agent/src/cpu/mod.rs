//! CPU profiling runtimes
//!
//! - [`full_instr`]: method-level call trees for root method subtrees
//! - [`code_region`]: wall time of a single instrumented region
//! - [`blocking`]: wait/sleep/monitor/park hooks shared by both

pub mod blocking;
pub mod code_region;
pub mod full_instr;

pub use blocking::{BlockingHooks, BlockingKind};
pub use code_region::CpuCodeRegion;
pub use full_instr::CpuFullInstr;
