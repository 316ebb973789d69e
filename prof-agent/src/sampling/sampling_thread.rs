//! # Sampling thread
//!
//! One named OS thread per periodic task. The thread registers itself as a
//! profiler server thread, asks for a raised scheduling priority and then
//! loops `sleep(corrected interval); task.sample()` until terminated.

#![allow(unsafe_code)] // setpriority() requires unsafe

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::interval::IntervalCorrector;
use crate::threads::ServerThreads;

/// Work done on every tick
pub trait SampleTask: Send {
    fn sample(&mut self);
}

/// Adapts a closure into a [`SampleTask`]
pub struct FnTask<F>(pub F);

impl<F: FnMut() + Send> SampleTask for FnTask<F> {
    fn sample(&mut self) {
        (self.0)();
    }
}

#[derive(Debug, Default)]
struct Shared {
    terminated: AtomicBool,
    ticks: AtomicU64,
    sleep_nanos: AtomicU64,
}

#[derive(Debug)]
pub struct SamplingThread {
    name: String,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl SamplingThread {
    /// Spawn the thread; the first sample is taken one interval from now
    ///
    /// # Errors
    /// Returns an error if the OS refuses to create the thread
    pub fn start(
        name: &str,
        interval: Duration,
        mut task: impl SampleTask + 'static,
        server_threads: Arc<ServerThreads>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let thread_shared = Arc::clone(&shared);

        let handle = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            let _server = server_threads.register_current();
            raise_priority();

            let mut corrector = IntervalCorrector::new(interval);
            let mut last_tick = Instant::now();
            loop {
                store_duration(&thread_shared.sleep_nanos, corrector.sleep_interval());
                if !sleep_unless_terminated(&thread_shared.terminated, corrector.sleep_interval()) {
                    break;
                }
                let now = Instant::now();
                corrector.record(now - last_tick);
                last_tick = now;

                task.sample();
                thread_shared.ticks.fetch_add(1, Ordering::Relaxed);
            }
        })?;

        log::info!("Sampling thread \"{name}\" started ({interval:?})");
        Ok(Self { name: name.to_string(), shared, handle: Some(handle) })
    }

    /// Stop the loop and wait for the thread to exit
    pub fn terminate(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.terminated.store(true, Ordering::Release);
        handle.thread().unpark();
        if handle.join().is_err() {
            log::error!("Sampling thread \"{}\" panicked", self.name);
        } else {
            log::info!("Sampling thread \"{}\" stopped after {} ticks", self.name, self.ticks());
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    /// Sleep interval currently in use after corrections
    #[must_use]
    pub fn current_interval(&self) -> Duration {
        Duration::from_nanos(self.shared.sleep_nanos.load(Ordering::Relaxed))
    }
}

impl Drop for SamplingThread {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[allow(clippy::cast_possible_truncation)]
fn store_duration(slot: &AtomicU64, duration: Duration) {
    slot.store(duration.as_nanos() as u64, Ordering::Relaxed);
}

/// Returns `false` if termination was requested before the interval elapsed
fn sleep_unless_terminated(terminated: &AtomicBool, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if terminated.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::park_timeout(deadline - now);
    }
}

#[cfg(target_os = "linux")]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn raise_priority() {
    // SAFETY: gettid has no preconditions
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    // SAFETY: plain syscall on our own thread id
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, -5) };
    if rc != 0 {
        log::debug!(
            "Could not raise sampling thread priority: {}",
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn raise_priority() {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_samples_until_terminated() {
        let server_threads = Arc::new(ServerThreads::new());
        let count = Arc::new(AtomicUsize::new(0));
        let seen_as_server = Arc::new(AtomicBool::new(false));

        let task = {
            let count = Arc::clone(&count);
            let seen = Arc::clone(&seen_as_server);
            let registry = Arc::clone(&server_threads);
            FnTask(move || {
                count.fetch_add(1, Ordering::SeqCst);
                if registry.is_current_server_thread() {
                    seen.store(true, Ordering::SeqCst);
                }
            })
        };

        let mut thread = SamplingThread::start(
            "test-sampler",
            Duration::from_millis(1),
            task,
            Arc::clone(&server_threads),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        thread.terminate();

        assert!(count.load(Ordering::SeqCst) >= 3);
        assert!(seen_as_server.load(Ordering::SeqCst));
        assert!(!thread.is_running());
        assert!(server_threads.is_empty());
        let ticks = thread.ticks();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(thread.ticks(), ticks);
    }

    #[test]
    fn test_terminate_does_not_wait_for_interval() {
        let mut thread = SamplingThread::start(
            "slow-sampler",
            Duration::from_secs(60),
            FnTask(|| {}),
            Arc::new(ServerThreads::new()),
        )
        .unwrap();
        let started = Instant::now();
        thread.terminate();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(thread.ticks(), 0);
    }
}
