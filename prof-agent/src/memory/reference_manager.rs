//! Reference manager thread
//!
//! Nothing tells the runtime when a tracked object is dropped, so a server
//! thread polls [`ObjLiveness::reap`] at the configured scan interval. An
//! object's death is reported at the first scan after it happened.

use std::io;
use std::sync::Arc;

use super::obj_liveness::ObjLiveness;
use crate::sampling::{FnTask, SamplingThread};

#[derive(Debug)]
pub struct ReferenceManager {
    thread: SamplingThread,
}

impl ReferenceManager {
    /// # Errors
    /// Returns an error if the thread cannot be spawned
    pub fn start(liveness: Arc<ObjLiveness>) -> io::Result<Self> {
        let runtime = Arc::clone(liveness.runtime());
        let interval = runtime.config().reference_scan_interval();
        let thread = SamplingThread::start(
            "prof-agent-refs",
            interval,
            FnTask(move || {
                liveness.reap();
            }),
            Arc::clone(runtime.server_threads()),
        )?;
        Ok(Self { thread })
    }

    /// Scans done so far
    #[must_use]
    pub fn scans(&self) -> u64 {
        self.thread.ticks()
    }

    pub fn terminate(&mut self) {
        self.thread.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::domain::ClassId;
    use crate::test_support::Capture;
    use crate::threads::ThreadToken;
    use std::time::{Duration, Instant};

    #[test]
    fn test_reclaimed_object_reported_in_background() {
        let config = RuntimeConfig {
            alloc_sampling_interval: 1,
            reference_scan_interval_ms: 1,
            ..RuntimeConfig::default()
        };
        let capture = Capture::new(config);
        let liveness = Arc::new(ObjLiveness::new(capture.runtime.clone()));
        let mut manager = ReferenceManager::start(Arc::clone(&liveness)).unwrap();

        let object = Arc::new(vec![0u8; 16]);
        liveness.trace_obj_alloc_on(&ThreadToken::new("main"), &object, ClassId(4));
        drop(object);

        let deadline = Instant::now() + Duration::from_secs(5);
        while liveness.gc_epoch() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        manager.terminate();

        assert_eq!(liveness.gc_epoch(), 1);
        assert_eq!(liveness.tracked_count(), 0);
        assert!(manager.scans() > 0);
    }
}
