//! File-health scoring.
//!
//! Produces the component scores persisted as append-only
//! [`FileHealth`] snapshots. Health feeds two consumers: crawl file
//! selection (low-health files rescan first) and the analytics trend API.

use mend_state::{FileHealth, HealthComponents, ProjectId};

/// Lines under which a file takes no size penalty.
const SIZE_FREE_LINES: usize = 200;

/// Lines at which the size component bottoms out.
const SIZE_FLOOR_LINES: usize = 2_000;

/// Score one file from its content and observed signals.
///
/// `open_issues` is the count of open issues on the path;
/// `recent_changes` is how many times the file changed in the recent
/// window (watcher events or crawl deltas).
pub fn score_file(
    project_id: ProjectId,
    path: &str,
    content: &str,
    open_issues: usize,
    recent_changes: u32,
) -> FileHealth {
    let lines = content.lines().count().max(1);

    // Issues per hundred lines, ten points each.
    let density_penalty = (open_issues as f64 * 100.0 / lines as f64) * 10.0;
    let issue_density = (100.0 - density_penalty).clamp(0.0, 100.0) as u8;

    let churn = (100u32.saturating_sub(recent_changes * 10)).min(100) as u8;

    let size = if lines <= SIZE_FREE_LINES {
        100
    } else if lines >= SIZE_FLOOR_LINES {
        0
    } else {
        let over = (lines - SIZE_FREE_LINES) as f64;
        let range = (SIZE_FLOOR_LINES - SIZE_FREE_LINES) as f64;
        (100.0 * (1.0 - over / range)).round() as u8
    };

    FileHealth::new(
        project_id,
        path,
        HealthComponents {
            issue_density,
            churn,
            size,
        },
    )
}
