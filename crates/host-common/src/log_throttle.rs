use std::collections::HashMap;

use parking_lot::Mutex;

/// First N occurrences of a given error kind log in full; beyond that,
/// occurrences are sampled, and beyond the hard cap nothing more is logged.
/// Bounds log growth under adversarial traffic while keeping the first
/// occurrences of any new failure mode visible.
pub struct LogThrottle {
    full_threshold: u64,
    hard_cap: u64,
    counts: Mutex<HashMap<&'static str, u64>>,
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(10, 10_000)
    }
}

impl LogThrottle {
    pub fn new(full_threshold: u64, hard_cap: u64) -> Self {
        Self {
            full_threshold,
            hard_cap,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether this occurrence of `kind` should be logged, sampling
    /// at `sample_rate` (0.0–1.0) once the kind has exceeded `full_threshold`
    /// occurrences, and never once it exceeds `hard_cap`.
    pub fn should_log(&self, kind: &'static str, sample_rate: f64) -> bool {
        let mut counts = self.counts.lock();
        let n = counts.entry(kind).or_insert(0);
        *n += 1;
        if *n <= self.full_threshold {
            true
        } else if *n > self.hard_cap {
            false
        } else {
            rand::random::<f64>() < sample_rate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrences_always_log() {
        let throttle = LogThrottle::new(3, 100);
        for _ in 0..3 {
            assert!(throttle.should_log("disk_trouble", 0.0));
        }
    }

    #[test]
    fn hard_cap_silences_kind_permanently() {
        let throttle = LogThrottle::new(1, 5);
        for _ in 0..5 {
            throttle.should_log("consensus_conflict", 1.0);
        }
        assert!(!throttle.should_log("consensus_conflict", 1.0));
    }

    #[test]
    fn kinds_are_tracked_independently() {
        let throttle = LogThrottle::new(1, 2);
        assert!(throttle.should_log("a", 0.0));
        assert!(throttle.should_log("b", 0.0));
    }
}
