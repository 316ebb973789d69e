//! # prof-agent - Main Entry Point
//!
//! - **record**: run the synthetic workload under the runtime and save every
//!   buffer dump (or stream them to a client with `--connect`)
//! - **decode**: list the events of a recording
//! - **export**: convert a recording to Chrome Trace Event JSON

// Main function is intentionally long for clarity
#![allow(clippy::too_many_lines)]

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use prof_agent::buffer::{ChannelConsumer, DumpedChunk, RemoteTransport, StreamTransport};
use prof_agent::cli::{Args, Command, RecordArgs};
use prof_agent::config::RuntimeConfig;
use prof_agent::domain::{AgentError, ConfigError};
use prof_agent::export::{display_recording, ChromeTraceExporter, Recording};
use prof_agent::runtime::ProfilerRuntime;
use prof_agent::sampling::{ShadowStacks, StackWalker};
use prof_agent::workload::{Workload, WorkloadOptions};
use prof_agent_common::WireConfig;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let bad_config = err.chain().any(|cause| {
        cause.is::<ConfigError>() || matches!(cause.downcast_ref::<AgentError>(), Some(AgentError::Config(_)))
    });
    if bad_config {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Record(record_args) => record(&record_args).await,
        Command::Decode { input, thread_cpu } => {
            let recording = Recording::open(&input, WireConfig { thread_cpu_timestamps: thread_cpu })?;
            display_recording(&recording);
            Ok(())
        }
        Command::Export { input, output, thread_cpu } => {
            let recording = Recording::open(&input, WireConfig { thread_cpu_timestamps: thread_cpu })?;
            let mut exporter = ChromeTraceExporter::new();
            exporter.add_recording(&recording);
            let file = File::create(&output).context("Failed to create trace output file")?;
            exporter.export(BufWriter::new(file)).context("Failed to export trace")?;
            println!("saved: {} ({} events)", output.display(), exporter.event_count());
            Ok(())
        }
    }
}

/// Append every chunk waiting in `rx` to the recording
fn drain_chunks(rx: &Receiver<DumpedChunk>, recording: &mut StreamTransport<BufWriter<File>>) -> Result<()> {
    for chunk in rx.try_iter() {
        if let Some(name) = &chunk.buffer_name {
            info!("Local buffer file: {}", name.display());
        }
        recording.send(&chunk.bytes).context("Failed to write recording")?;
    }
    Ok(())
}

async fn record(args: &RecordArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let config = args.apply(base);
    let wire_cpu = config.thread_cpu_timestamps;

    let stacks = Arc::new(ShadowStacks::new());
    let walker: Arc<dyn StackWalker> = stacks.clone();
    let builder = ProfilerRuntime::builder(config).stack_walker(walker);

    // Local mode hands dumps to this thread; remote mode writes them to the socket
    let (runtime, mut local) = if let Some(addr) = &args.connect {
        let stream = TcpStream::connect(addr).with_context(|| format!("Failed to connect to {addr}"))?;
        stream.set_nodelay(true).ok();
        info!("Streaming dumps to {addr}");
        (builder.remote(StreamTransport::new(stream)).build()?, None)
    } else {
        let (consumer, rx) = ChannelConsumer::unbounded();
        let file = File::create(&args.output)
            .with_context(|| format!("Failed to create recording {}", args.output.display()))?;
        let recording = StreamTransport::new(BufWriter::new(file));
        (builder.consumer(consumer).build()?, Some((rx, recording)))
    };

    let options = WorkloadOptions {
        mode: args.mode,
        threads: args.threads,
        heap_dump_dir: args.heap_dump_dir.clone(),
    };
    let workload = Workload::start(&runtime, stacks, &options).context("Failed to start workload")?;

    println!("prof-agent v{}", env!("CARGO_PKG_VERSION"));
    println!("mode: {:?}, threads: {}", args.mode, args.threads);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        runtime.dump_existing_results();
        runtime.release_dead_threads();
        if let Some((rx, recording)) = local.as_mut() {
            drain_chunks(rx, recording)?;
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => break,
        }
    }

    let summary = workload.stop();
    runtime.shutdown();

    if let Some((rx, mut recording)) = local.take() {
        drain_chunks(&rx, &mut recording)?;
        let frames = recording.frames();
        recording.into_inner().flush().context("Failed to flush recording")?;
        println!("saved: {} ({frames} dumps)", args.output.display());
        print_decode_hint(&args.output, wire_cpu);
    }

    if summary.iterations == 0 {
        warn!("Workload made no progress; nothing was recorded");
    }
    eprintln!(
        "{exit_reason}: {:.1}s, {} iterations, {} sampler ticks, {} reference scans, {} threads profiled",
        started.elapsed().as_secs_f64(),
        summary.iterations,
        summary.sampler_ticks,
        summary.reference_scans,
        runtime.profiled_thread_count(),
    );
    Ok(())
}

fn print_decode_hint(output: &Path, thread_cpu: bool) {
    let flag = if thread_cpu { " --thread-cpu" } else { "" };
    println!("inspect: prof-agent decode {}{flag}", output.display());
}
