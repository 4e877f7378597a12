//! Debounced repository watcher.
//!
//! Wraps `notify` and batches raw filesystem events: after a change, the
//! watcher waits for a quiet period before emitting the accumulated set
//! of changed paths. Consumers typically enqueue a crawl job scoped to
//! the batch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{MendError, Result};

/// Default quiet period before a batch is emitted.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// A running watcher. Dropping it stops watching; the receiver then
/// drains any final batch and closes.
pub struct RepoWatcher {
    _watcher: RecommendedWatcher,
}

impl RepoWatcher {
    /// Watch `root` recursively, emitting debounced batches of changed
    /// paths (relative to `root`) on the returned channel.
    pub fn start(
        root: &Path,
        debounce: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Vec<PathBuf>>)> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();

        let root_owned = root.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for path in event.paths {
                        let rel = path
                            .strip_prefix(&root_owned)
                            .map(Path::to_path_buf)
                            .unwrap_or(path);
                        // Channel closure just means the consumer is gone.
                        let _ = raw_tx.send(rel);
                    }
                }
                Err(e) => warn!(error = %e, "watch event error"),
            }
        })
        .map_err(|e| MendError::Transient(format!("watcher start failed: {e}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| MendError::Transient(format!("watch registration failed: {e}")))?;

        // Debounce task: collect paths until the stream goes quiet.
        tokio::spawn(async move {
            loop {
                let Some(first) = raw_rx.recv().await else {
                    break;
                };
                let mut batch: HashSet<PathBuf> = HashSet::from([first]);

                loop {
                    match tokio::time::timeout(debounce, raw_rx.recv()).await {
                        Ok(Some(path)) => {
                            batch.insert(path);
                        }
                        Ok(None) | Err(_) => break,
                    }
                }

                let mut paths: Vec<PathBuf> = batch.into_iter().collect();
                paths.sort();
                debug!(count = paths.len(), "watch batch emitted");
                if batch_tx.send(paths).is_err() {
                    break;
                }
            }
        });

        Ok((Self { _watcher: watcher }, batch_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_changes_are_batched() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, mut rx) =
            RepoWatcher::start(dir.path(), Duration::from_millis(200)).unwrap();

        std::fs::write(dir.path().join("a.rs"), "one").unwrap();
        std::fs::write(dir.path().join("b.rs"), "two").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("batch within timeout")
            .expect("channel open");
        assert!(!batch.is_empty());

        drop(watcher);
    }
}
