//! # prof-agent - In-Process Profiler Agent Runtime
//!
//! The part of a profiling agent that lives inside the profiled process.
//! Instrumented code calls into it on method entry/exit, allocations and
//! profiling points; it records compact binary events per thread, multiplexes
//! them into one stream and hands that stream to a client tool, either
//! through a memory-mapped file or over a socket. A sampling thread adds
//! periodic stack snapshots of every thread.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Instrumented Application                     │
//! │  method_entry / method_exit / trace_obj_alloc / point hits      │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ per-thread calls
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    prof-agent (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ cpu / memory │──▶│ ThreadRecord │──▶│ shared buffer│         │
//! │  │   runtimes   │   │ local buffer │   │ (sink lock)  │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │  ┌──────────────┐                             │                 │
//! │  │   sampling   │─────────────────────────────┤                 │
//! │  │    thread    │                             ▼                 │
//! │  └──────────────┘                  ┌────────────────────┐       │
//! │                                    │ EventBufferManager │       │
//! │                                    │  mmap file | socket│       │
//! │                                    └─────────┬──────────┘       │
//! └──────────────────────────────────────────────┼──────────────────┘
//!                                                ▼
//!                                          client tool
//! ```
//!
//! ## Module Structure
//!
//! - [`runtime`]: [`runtime::ProfilerRuntime`], the context every subsystem
//!   shares: thread registry, shared sink, admission control, suspend/resume
//! - [`threads`]: thread identity, per-thread records and the thread table
//! - [`buffer`]: event buffers, the buffer manager and its transports
//! - [`cpu`]: full-instrumentation and code-region CPU runtimes
//! - [`sampling`]: the periodic sampling thread and the stack sampler
//! - [`memory`]: allocation and liveness runtimes
//! - [`profiling_points`]: handler factory, registry and dispatch
//! - [`export`]: offline decoding and Chrome trace export
//! - [`workload`]: synthetic application driving the runtime for `record`
//! - [`config`], [`timers`], [`domain`]: configuration, clocks, ids and errors
//!
//! ## Wire Format
//!
//! Event layout is defined in the `prof-agent-common` crate, shared with
//! client tools.

pub mod buffer;
pub mod cli;
pub mod config;
pub mod cpu;
pub mod domain;
pub mod export;
pub mod memory;
pub mod profiling_points;
pub mod runtime;
pub mod sampling;
pub mod threads;
pub mod timers;
pub mod workload;

#[cfg(test)]
pub(crate) mod test_support;
