//! Global atomic counters for Mend observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a crawl).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters — no allocations, no locking.
pub struct Metrics {
    issues_detected: AtomicU64,
    fixes_applied: AtomicU64,
    fixes_rolled_back: AtomicU64,
    crawl_jobs_processed: AtomicU64,
    webhooks_rejected: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            issues_detected: AtomicU64::new(0),
            fixes_applied: AtomicU64::new(0),
            fixes_rolled_back: AtomicU64::new(0),
            crawl_jobs_processed: AtomicU64::new(0),
            webhooks_rejected: AtomicU64::new(0),
        }
    }

    pub fn inc_issues_detected(&self) {
        self.issues_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fixes_applied(&self) {
        self.fixes_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fixes_rolled_back(&self) {
        self.fixes_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_crawl_jobs_processed(&self) {
        self.crawl_jobs_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_webhooks_rejected(&self) {
        self.webhooks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a crawl, daemon tick)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            issues_detected = self.issues_detected(),
            fixes_applied = self.fixes_applied(),
            fixes_rolled_back = self.fixes_rolled_back(),
            crawl_jobs_processed = self.crawl_jobs_processed(),
            webhooks_rejected = self.webhooks_rejected(),
        );
    }

    pub fn issues_detected(&self) -> u64 {
        self.issues_detected.load(Ordering::Relaxed)
    }

    pub fn fixes_applied(&self) -> u64 {
        self.fixes_applied.load(Ordering::Relaxed)
    }

    pub fn fixes_rolled_back(&self) -> u64 {
        self.fixes_rolled_back.load(Ordering::Relaxed)
    }

    pub fn crawl_jobs_processed(&self) -> u64 {
        self.crawl_jobs_processed.load(Ordering::Relaxed)
    }

    pub fn webhooks_rejected(&self) -> u64 {
        self.webhooks_rejected.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.issues_detected.store(0, Ordering::Relaxed);
        self.fixes_applied.store(0, Ordering::Relaxed);
        self.fixes_rolled_back.store(0, Ordering::Relaxed);
        self.crawl_jobs_processed.store(0, Ordering::Relaxed);
        self.webhooks_rejected.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_issues_detected();
        m.inc_issues_detected();
        assert_eq!(m.issues_detected(), 2);

        m.inc_fixes_applied();
        assert_eq!(m.fixes_applied(), 1);

        m.inc_fixes_rolled_back();
        assert_eq!(m.fixes_rolled_back(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_crawl_jobs_processed();
        m.inc_webhooks_rejected();
        m.reset();
        assert_eq!(m.crawl_jobs_processed(), 0);
        assert_eq!(m.webhooks_rejected(), 0);
    }
}
