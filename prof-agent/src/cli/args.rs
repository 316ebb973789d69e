//! CLI argument definitions

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::RuntimeConfig;
use crate::workload::ProfilingMode;

#[derive(Parser)]
#[command(
    name = "prof-agent",
    about = "In-process profiler agent runtime",
    after_help = "\
EXAMPLES:
    prof-agent record --mode cpu --duration 5 -o run.prof     Full instrumentation for 5s
    prof-agent record --mode sampling --connect 127.0.0.1:5140 Stream dumps to a client
    prof-agent decode run.prof                                 List recorded events
    prof-agent export run.prof -o trace.json                   Chrome trace for Perfetto"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Profile the synthetic workload and save every buffer dump
    Record(RecordArgs),

    /// Print the events of a recording
    Decode {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Method events carry thread CPU timestamps
        #[arg(long)]
        thread_cpu: bool,
    },

    /// Convert a recording to Chrome Trace Event JSON
    Export {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long, value_name = "FILE", default_value = "trace.json")]
        output: PathBuf,

        /// Method events carry thread CPU timestamps
        #[arg(long)]
        thread_cpu: bool,
    },
}

#[derive(ClapArgs)]
pub struct RecordArgs {
    #[arg(long, value_enum, default_value = "cpu")]
    pub mode: ProfilingMode,

    /// JSON runtime configuration; flags below override it
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Stream dumps to a client instead of a local buffer file
    #[arg(long, value_name = "HOST:PORT")]
    pub connect: Option<String>,

    /// Recording file
    #[arg(short, long, value_name = "FILE", default_value = "agent.prof")]
    pub output: PathBuf,

    /// Stop after N seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "5")]
    pub duration: u64,

    /// Workload threads
    #[arg(long, default_value = "4")]
    pub threads: usize,

    /// Directory for heap dumps written by the heap dump profiling point
    #[arg(long, value_name = "DIR")]
    pub heap_dump_dir: Option<PathBuf>,

    /// Sampling interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Maximum number of profiled threads
    #[arg(long)]
    pub max_threads: Option<u32>,

    /// Record every Nth allocation on average
    #[arg(long)]
    pub alloc_interval: Option<u32>,

    /// Seed for allocation sampling (random when omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Add thread CPU timestamps to method events
    #[arg(long)]
    pub thread_cpu: bool,
}

impl RecordArgs {
    /// Apply command-line overrides on top of `config`
    #[must_use]
    pub fn apply(&self, mut config: RuntimeConfig) -> RuntimeConfig {
        if let Some(ms) = self.interval_ms {
            config.sampling_interval_ms = ms;
        }
        if let Some(max) = self.max_threads {
            config.max_profiled_threads = max;
        }
        if let Some(interval) = self.alloc_interval {
            config.alloc_sampling_interval = interval;
        }
        if self.seed.is_some() {
            config.alloc_sampling_seed = self.seed;
        }
        if self.thread_cpu {
            config.thread_cpu_timestamps = true;
        }
        config
    }
}
