//! Advisory per-(project, path) locks.
//!
//! Two workers must never apply fixes to the same file simultaneously.
//! The registry hands out RAII guards; dropping the guard releases the
//! lock, so a worker that panics or errors out still releases on unwind.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use mend_state::ProjectId;

/// In-process advisory lock registry keyed by (project, path).
#[derive(Debug, Default)]
pub struct PathLocks {
    held: Mutex<HashSet<(String, String)>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for a (project, path). Returns `None` when
    /// another worker already holds it; never blocks.
    pub fn try_acquire(
        self: &Arc<Self>,
        project_id: &ProjectId,
        path: &str,
    ) -> Option<PathLockGuard> {
        let key = (project_id.0.clone(), path.to_string());
        let mut held = self.held.lock().unwrap();
        if held.contains(&key) {
            return None;
        }
        held.insert(key.clone());
        Some(PathLockGuard {
            locks: Arc::clone(self),
            key,
        })
    }

    /// Whether a lock is currently held (diagnostics only).
    pub fn is_held(&self, project_id: &ProjectId, path: &str) -> bool {
        let key = (project_id.0.clone(), path.to_string());
        self.held.lock().unwrap().contains(&key)
    }
}

/// RAII guard; the lock releases when this drops.
pub struct PathLockGuard {
    locks: Arc<PathLocks>,
    key: (String, String),
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        self.locks.held.lock().unwrap().remove(&self.key);
    }
}
