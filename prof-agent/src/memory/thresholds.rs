//! Allocation sampling thresholds
//!
//! Stack traces are expensive, so only some allocations of a class get one.
//! The distance to the next captured allocation is drawn uniformly from
//! `[interval / 2, interval + interval / 2]`, which keeps the mean at
//! `interval` while avoiding lock-step with periodic allocation patterns.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::ClassId;

#[derive(Debug, Clone)]
pub struct SamplingThresholds {
    rng: StdRng,
    interval: u32,
}

impl SamplingThresholds {
    /// Deterministic thresholds when `seed` is given
    #[must_use]
    pub fn new(interval: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng, interval }
    }

    /// Allocations until the next captured one, at least 1
    pub fn next_threshold(&mut self) -> u32 {
        if self.interval <= 1 {
            return 1;
        }
        let half = self.interval / 2;
        self.rng.random_range(half..=self.interval + half).max(1)
    }

    #[must_use]
    pub fn interval(&self) -> u32 {
        self.interval
    }
}

/// Per-class allocation counters and sampling countdowns
#[derive(Debug)]
pub struct AllocTable {
    counts: Vec<u64>,
    countdown: Vec<u32>,
    thresholds: SamplingThresholds,
}

impl AllocTable {
    #[must_use]
    pub fn new(classes: usize, thresholds: SamplingThresholds) -> Self {
        Self { counts: vec![0; classes], countdown: vec![0; classes], thresholds }
    }

    /// Count one allocation of `class`; returns whether to capture its stack
    ///
    /// Countdowns start at zero, so the first allocation of every class is
    /// always captured.
    pub fn record(&mut self, class: ClassId) -> bool {
        let idx = class.index();
        if idx >= self.counts.len() {
            return false;
        }
        self.counts[idx] += 1;
        let capture = self.countdown[idx] == 0;
        if capture {
            self.countdown[idx] = self.thresholds.next_threshold();
        }
        self.countdown[idx] -= 1;
        capture
    }

    #[must_use]
    pub fn count(&self, class: ClassId) -> u64 {
        self.counts.get(class.index()).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
        self.countdown.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_stay_in_range() {
        let mut thresholds = SamplingThresholds::new(10, Some(7));
        for _ in 0..1000 {
            let t = thresholds.next_threshold();
            assert!((5..=15).contains(&t), "{t}");
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = SamplingThresholds::new(100, Some(42));
        let mut b = SamplingThresholds::new(100, Some(42));
        let xs: Vec<_> = (0..50).map(|_| a.next_threshold()).collect();
        let ys: Vec<_> = (0..50).map(|_| b.next_threshold()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_interval_one_captures_everything() {
        let mut table = AllocTable::new(4, SamplingThresholds::new(1, None));
        assert!((0..100).all(|_| table.record(ClassId(2))));
        assert_eq!(table.count(ClassId(2)), 100);
    }

    #[test]
    fn test_first_allocation_captured_then_spaced() {
        let mut table = AllocTable::new(4, SamplingThresholds::new(10, Some(1)));
        assert!(table.record(ClassId(0)));
        let captured = (1..200).filter(|_| table.record(ClassId(0))).count();
        assert!((200 / 15..=200 / 5).contains(&captured), "{captured}");
        assert!(table.record(ClassId(1)));
        assert!(!table.record(ClassId(9)));
        assert_eq!(table.count(ClassId(9)), 0);
    }
}
