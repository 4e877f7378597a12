//! Learned defect-to-fix patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::Fingerprint;

/// Attempts after which a low success rate deprecates a pattern.
pub const DEPRECATION_MIN_ATTEMPTS: u64 = 10;

/// Success-rate floor below which a pattern is deprecated.
pub const DEPRECATION_RATE_FLOOR: f64 = 0.2;

/// A learned defect-to-fix mapping, keyed by fingerprint.
///
/// Confidence is Laplace-smoothed: `(success + 1) / (success + failure + 2)`.
/// A pattern with `attempts >= 10` and success rate `< 0.2` is deprecated
/// and never offered by the generator again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub fingerprint: Fingerprint,
    /// Times the defect was seen (independent of fix attempts).
    pub occurrences: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Derived, always in [0, 1].
    pub confidence: f64,
    /// Best known fix body for this defect shape.
    pub best_fix: Option<String>,
    pub deprecated: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Pattern {
    /// A fresh pattern with no attempts. Confidence starts at the
    /// uninformed prior 1/2.
    pub fn new(fingerprint: Fingerprint) -> Self {
        let now = Utc::now();
        Self {
            fingerprint,
            occurrences: 1,
            success_count: 0,
            failure_count: 0,
            confidence: 0.5,
            best_fix: None,
            deprecated: false,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn attempts(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Raw success rate; 0 when no attempts yet.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            0.0
        } else {
            self.success_count as f64 / attempts as f64
        }
    }

    /// Recompute confidence and the deprecation flag from the counters.
    ///
    /// Must be called inside the same unit of work as any counter change.
    pub fn recompute(&mut self) {
        self.confidence =
            (self.success_count as f64 + 1.0) / (self.attempts() as f64 + 2.0);
        self.deprecated = self.attempts() >= DEPRECATION_MIN_ATTEMPTS
            && self.success_rate() < DEPRECATION_RATE_FLOOR;
        self.last_seen = Utc::now();
    }

    /// Apply success/failure deltas and recompute derived fields.
    ///
    /// Panics if a delta would drive a counter negative: counters only go
    /// negative when learning bookkeeping is broken, which is fatal.
    pub fn apply_deltas(&mut self, delta_success: i64, delta_failure: i64) {
        let success = self.success_count as i64 + delta_success;
        let failure = self.failure_count as i64 + delta_failure;
        assert!(
            success >= 0 && failure >= 0,
            "pattern {} counters went negative (success={success}, failure={failure})",
            self.fingerprint
        );
        self.success_count = success as u64;
        self.failure_count = failure as u64;
        self.recompute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> Fingerprint {
        Fingerprint::from_parts("smell", "todo left in code", "src/lib.rs", "todo-scanner")
    }

    #[test]
    fn test_fresh_pattern_prior() {
        let p = Pattern::new(fp());
        assert_eq!(p.confidence, 0.5);
        assert!(!p.deprecated);
    }

    #[test]
    fn test_laplace_confidence() {
        let mut p = Pattern::new(fp());
        p.apply_deltas(1, 0);
        // (1 + 1) / (1 + 2) = 2/3
        assert!((p.confidence - 2.0 / 3.0).abs() < 1e-9);

        p.apply_deltas(0, 1);
        // (1 + 1) / (2 + 2) = 1/2
        assert!((p.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_deprecation_rule() {
        let mut p = Pattern::new(fp());
        for _ in 0..10 {
            p.apply_deltas(0, 1);
        }
        assert_eq!(p.failure_count, 10);
        assert!(p.deprecated);
        // confidence = 1/12
        assert!((p.confidence - 1.0 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_not_deprecated_below_min_attempts() {
        let mut p = Pattern::new(fp());
        for _ in 0..9 {
            p.apply_deltas(0, 1);
        }
        assert!(!p.deprecated, "9 attempts must not deprecate");
    }

    #[test]
    fn test_confidence_bounds_over_many_updates() {
        let mut p = Pattern::new(fp());
        for i in 0..100 {
            if i % 3 == 0 {
                p.apply_deltas(1, 0);
            } else {
                p.apply_deltas(0, 1);
            }
            assert!((0.0..=1.0).contains(&p.confidence));
            let expected =
                (p.success_count as f64 + 1.0) / (p.attempts() as f64 + 2.0);
            assert!((p.confidence - expected).abs() < 1e-12);
        }
    }

    #[test]
    #[should_panic(expected = "went negative")]
    fn test_negative_counter_panics() {
        let mut p = Pattern::new(fp());
        p.apply_deltas(-1, 0);
    }
}
