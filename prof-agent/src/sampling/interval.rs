//! Sampling interval correction
//!
//! A sampling tick is late when the time since the previous tick exceeds the
//! target by more than 25%. After [`VIOLATION_THRESHOLD`] late ticks in a row
//! the sleep interval is shortened by 5% to compensate for the time the
//! sampling itself takes. It is never lengthened again.

use std::time::Duration;

/// Consecutive late ticks before the sleep interval is shortened
pub const VIOLATION_THRESHOLD: u32 = 10;

#[derive(Debug, Clone)]
pub struct IntervalCorrector {
    target: Duration,
    sleep: Duration,
    violations: u32,
}

impl IntervalCorrector {
    #[must_use]
    pub fn new(target: Duration) -> Self {
        Self { target, sleep: target, violations: 0 }
    }

    /// Account for one tick that came `elapsed` after the previous one
    ///
    /// Returns `true` if the sleep interval was shortened.
    pub fn record(&mut self, elapsed: Duration) -> bool {
        if elapsed * 4 <= self.target * 5 {
            self.violations = 0;
            return false;
        }
        self.violations += 1;
        if self.violations < VIOLATION_THRESHOLD {
            return false;
        }
        self.violations = 0;
        self.sleep = self.sleep * 95 / 100;
        log::debug!("Sampling late, sleep interval now {:?}", self.sleep);
        true
    }

    #[must_use]
    pub fn sleep_interval(&self) -> Duration {
        self.sleep
    }

    #[must_use]
    pub fn target(&self) -> Duration {
        self.target
    }

    #[must_use]
    pub fn violations(&self) -> u32 {
        self.violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: Duration = Duration::from_millis(10);

    #[test]
    fn test_shortens_by_five_percent_after_threshold() {
        let mut corrector = IntervalCorrector::new(TARGET);
        let late = Duration::from_millis(13);
        for _ in 0..VIOLATION_THRESHOLD - 1 {
            assert!(!corrector.record(late));
        }
        assert_eq!(corrector.sleep_interval(), TARGET);
        assert!(corrector.record(late));
        assert_eq!(corrector.sleep_interval(), Duration::from_micros(9_500));
        assert_eq!(corrector.violations(), 0);
    }

    #[test]
    fn test_on_time_tick_resets_count() {
        let mut corrector = IntervalCorrector::new(TARGET);
        let late = Duration::from_millis(20);
        for _ in 0..VIOLATION_THRESHOLD - 1 {
            corrector.record(late);
        }
        // Exactly 125% is not late
        corrector.record(Duration::from_micros(12_500));
        assert_eq!(corrector.violations(), 0);
        for _ in 0..VIOLATION_THRESHOLD - 1 {
            corrector.record(late);
        }
        assert_eq!(corrector.sleep_interval(), TARGET);
    }

    #[test]
    fn test_never_lengthens() {
        let mut corrector = IntervalCorrector::new(TARGET);
        let mut last = corrector.sleep_interval();
        for i in 0..200u64 {
            let elapsed = if i % 3 == 0 { Duration::from_millis(1) } else { Duration::from_millis(50) };
            corrector.record(elapsed);
            assert!(corrector.sleep_interval() <= last);
            last = corrector.sleep_interval();
        }
        assert_eq!(corrector.target(), TARGET);
    }
}
