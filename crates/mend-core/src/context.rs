//! Dependency-injected service context.
//!
//! Everything the pipeline needs travels in one [`ServiceContext`] bundle:
//! store, cache, queue, model, clock, detectors, locks, config. The only
//! process-wide state is connection pools, created at boot and torn down
//! at shutdown; no module-level singletons.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mend_state::{CacheHandle, JobQueue, MemoryQueue, MemoryStore, NullCache, ObjectStore};

use crate::config::Config;
use crate::detect::DetectorRegistry;
use crate::generate::ModelClient;
use crate::locks::PathLocks;

/// Source of time; injectable so monitor-window logic is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// The dependency bundle passed through every call chain.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn ObjectStore>,
    pub cache: CacheHandle,
    pub queue: Arc<dyn JobQueue>,
    pub model: Arc<dyn ModelClient>,
    pub clock: Arc<dyn Clock>,
    pub detectors: Arc<DetectorRegistry>,
    pub locks: Arc<PathLocks>,
    pub config: Config,
}

impl ServiceContext {
    /// Fully in-memory context: memory store, no cache, memory queue.
    /// Used by tests and the embedded CLI path.
    pub fn in_memory(model: Arc<dyn ModelClient>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            cache: CacheHandle::new(Arc::new(NullCache::new())),
            queue: Arc::new(MemoryQueue::new()),
            model,
            clock: Arc::new(SystemClock),
            detectors: Arc::new(DetectorRegistry::with_builtins()),
            locks: Arc::new(PathLocks::new()),
            config: Config::local(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cache(mut self, cache: CacheHandle) -> Self {
        self.cache = cache;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at(Utc::now());
        let before = clock.now();
        clock.advance(chrono::Duration::hours(25));
        assert_eq!(clock.now() - before, chrono::Duration::hours(25));
    }
}
