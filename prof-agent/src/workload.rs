//! Synthetic workload
//!
//! `prof-agent record` has no instrumented application to attach to, so it
//! drives the runtime from worker threads that behave like one: nested
//! instrumented calls, sleeps reported through the blocking hooks,
//! allocations and profiling point hits. The shadow stacks the workers
//! maintain are what the stack sampler sees.

use clap::ValueEnum;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::MissingHandlerPolicy;
use crate::cpu::{BlockingHooks, BlockingKind, CpuFullInstr};
use crate::domain::{AgentError, ClassId, MethodId};
use crate::memory::{HeapSource, ObjAlloc, ObjLiveness, ReferenceManager};
use crate::profiling_points::{
    HandlerContext, HandlerFactory, HandlerRegistry, JsonHeapDumper, ProfilingPointServer,
};
use crate::runtime::ProfilerRuntime;
use crate::sampling::{SamplingThread, ShadowStacks, StackSampler};
use crate::threads::ThreadToken;

/// Profiling point hit once per batch
pub const BATCH_POINT: i32 = 1;
/// Profiling point that writes a heap dump, hit by the first worker only
pub const HEAP_DUMP_POINT: i32 = 2;

const ROOT_METHOD: u16 = 1;
const CALL_DEPTH: u16 = 4;
const BATCH_SIZE: u64 = 50;
const KEPT_OBJECTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProfilingMode {
    /// Full instrumentation of every call
    Cpu,
    /// Periodic stack sampling
    Sampling,
    /// Allocation counting with sampled stacks
    Memory,
    /// Allocation tracking until objects are dropped
    Liveness,
}

#[derive(Debug, Clone)]
pub struct WorkloadOptions {
    pub mode: ProfilingMode,
    pub threads: usize,
    /// Where the heap dump profiling point writes; no heap dump point when unset
    pub heap_dump_dir: Option<PathBuf>,
}

/// What the running workload hands to each worker
struct Instruments {
    mode: ProfilingMode,
    cpu: CpuFullInstr,
    stacks: Arc<ShadowStacks>,
    alloc: Arc<ObjAlloc>,
    liveness: Arc<ObjLiveness>,
    points: ProfilingPointServer,
    stop: AtomicBool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadSummary {
    pub iterations: u64,
    pub sampler_ticks: u64,
    pub reference_scans: u64,
}

pub struct Workload {
    instruments: Arc<Instruments>,
    workers: Vec<JoinHandle<u64>>,
    sampler: Option<SamplingThread>,
    references: Option<ReferenceManager>,
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload")
            .field("mode", &self.instruments.mode)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl Workload {
    /// Spawn the workers and whatever server threads `options.mode` needs
    ///
    /// `stacks` must be the stack walker the runtime was built with.
    ///
    /// # Errors
    /// Returns an error if a profiling point handler cannot be created or a
    /// thread cannot be spawned
    pub fn start(
        runtime: &Arc<ProfilerRuntime>,
        stacks: Arc<ShadowStacks>,
        options: &WorkloadOptions,
    ) -> Result<Self, AgentError> {
        let alloc = Arc::new(ObjAlloc::new(Arc::clone(runtime)));
        let liveness = Arc::new(ObjLiveness::new(Arc::clone(runtime)));
        let sources: Vec<Arc<dyn HeapSource>> = vec![alloc.clone(), liveness.clone()];
        let ctx = HandlerContext::new(Arc::clone(runtime))
            .with_heap_dumper(Arc::new(JsonHeapDumper::new(sources)));

        let mut ids = vec![BATCH_POINT];
        let mut kinds = vec!["default"];
        let mut infos = vec![String::new()];
        if let Some(dir) = &options.heap_dump_dir {
            ids.push(HEAP_DUMP_POINT);
            kinds.push("heapdump");
            infos.push(dir.display().to_string());
        }
        let infos: Vec<&str> = infos.iter().map(String::as_str).collect();
        let registry = HandlerRegistry::init_instances(
            &ids,
            &kinds,
            &infos,
            &HandlerFactory::with_defaults(),
            &ctx,
            MissingHandlerPolicy::Fail,
        )?;

        let instruments = Arc::new(Instruments {
            mode: options.mode,
            cpu: CpuFullInstr::new(Arc::clone(runtime)),
            stacks,
            alloc,
            liveness: Arc::clone(&liveness),
            points: ProfilingPointServer::new(Arc::clone(runtime), registry),
            stop: AtomicBool::new(false),
        });

        let sampler = if options.mode == ProfilingMode::Sampling {
            Some(SamplingThread::start(
                "prof-agent-sampler",
                runtime.config().sampling_interval(),
                StackSampler::new(Arc::clone(runtime)),
                Arc::clone(runtime.server_threads()),
            )?)
        } else {
            None
        };
        let references = if options.mode == ProfilingMode::Liveness {
            Some(ReferenceManager::start(liveness)?)
        } else {
            None
        };

        let mut workers = Vec::with_capacity(options.threads);
        for index in 0..options.threads {
            let instruments = Arc::clone(&instruments);
            let handle = std::thread::Builder::new()
                .name(format!("workload-{index}"))
                .spawn(move || run_worker(&instruments, index))?;
            workers.push(handle);
        }
        log::info!("Workload started: {:?} mode, {} threads", options.mode, options.threads);

        Ok(Self { instruments, workers, sampler, references })
    }

    /// Stop the workers and server threads
    pub fn stop(mut self) -> WorkloadSummary {
        self.instruments.stop.store(true, Ordering::Release);
        let mut summary = WorkloadSummary::default();
        for handle in self.workers.drain(..) {
            match handle.join() {
                Ok(iterations) => summary.iterations += iterations,
                Err(_) => log::error!("Workload thread panicked"),
            }
        }
        if let Some(mut sampler) = self.sampler.take() {
            sampler.terminate();
            summary.sampler_ticks = sampler.ticks();
        }
        if let Some(mut references) = self.references.take() {
            references.terminate();
            summary.reference_scans = references.scans();
        }
        if self.instruments.mode == ProfilingMode::Liveness {
            self.instruments.liveness.reap();
        }
        summary
    }
}

fn run_worker(instruments: &Instruments, index: usize) -> u64 {
    let Some(token) = ThreadToken::current() else {
        return 0;
    };
    instruments.stacks.register(&token);

    let mut kept: Vec<Arc<Vec<u8>>> = Vec::with_capacity(KEPT_OBJECTS);
    let mut iterations = 0u64;
    while !instruments.stop.load(Ordering::Acquire) {
        match instruments.mode {
            ProfilingMode::Cpu => instrumented_call(instruments, &token, iterations),
            ProfilingMode::Sampling => sampled_call(instruments, &token, iterations),
            ProfilingMode::Memory => {
                let object = vec![0u8; 64 + 32 * usize::try_from(iterations % 7).unwrap_or(0)];
                let class = ClassId(u16::try_from(iterations % 5).unwrap_or(0) + 1);
                instruments.alloc.trace_obj_alloc_on(&token, object.as_slice(), class);
            }
            ProfilingMode::Liveness => {
                let object = Arc::new(vec![0u8; 128]);
                let class = ClassId(u16::try_from(iterations % 3).unwrap_or(0) + 1);
                instruments.liveness.trace_obj_alloc_on(&token, &object, class);
                if kept.len() == KEPT_OBJECTS {
                    kept.clear();
                }
                kept.push(object);
            }
        }

        iterations += 1;
        if iterations % BATCH_SIZE == 0 {
            instruments.points.profiling_point_hit_on(&token, BATCH_POINT);
            if index == 0 && iterations == BATCH_SIZE {
                instruments.points.profiling_point_hit_on(&token, HEAP_DUMP_POINT);
            }
            instruments.cpu.blocking_entry_on(&token, BlockingKind::Sleep);
            std::thread::sleep(Duration::from_millis(1));
            instruments.cpu.blocking_exit_on(&token, BlockingKind::Sleep);
        }
    }

    instruments.stacks.unregister(&token);
    iterations
}

/// root -> m2 -> m3 -> ... with a little work at the bottom
fn instrumented_call(instruments: &Instruments, token: &Arc<ThreadToken>, iteration: u64) {
    let cpu = &instruments.cpu;
    cpu.root_method_entry_on(token, MethodId(ROOT_METHOD));
    for method in 2..=CALL_DEPTH {
        cpu.method_entry_on(token, MethodId(method));
    }
    std::hint::black_box(spin(iteration));
    for method in (2..=CALL_DEPTH).rev() {
        cpu.method_exit_on(token, MethodId(method));
    }
    cpu.method_exit_on(token, MethodId(ROOT_METHOD));
}

fn sampled_call(instruments: &Instruments, token: &Arc<ThreadToken>, iteration: u64) {
    let depth = 1 + u32::try_from(iteration % u64::from(CALL_DEPTH)).unwrap_or(0);
    for frame in 1..=depth {
        instruments.stacks.push(token, frame);
    }
    std::hint::black_box(spin(iteration));
    std::thread::sleep(Duration::from_micros(200));
    for _ in 0..depth {
        instruments.stacks.pop(token);
    }
}

fn spin(seed: u64) -> u64 {
    let mut acc = seed;
    for i in 0..2_000u64 {
        acc = std::hint::black_box(acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(i));
    }
    acc
}
