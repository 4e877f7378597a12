//! Stage-2 impact prediction.
//!
//! Estimates the blast radius of touching a file: likely-affected files
//! via textual reachability (who mentions this module), breaking-change
//! markers near the issue line, and a risk score in [0, 1].

use std::path::Path;

use mend_state::{ImpactSummary, Issue, IssueKind, Severity};

use crate::crawl::list_source_files;

/// Markers that suggest a public surface or schema is being edited.
const BREAKING_MARKERS: &[&str] = &[
    "pub fn",
    "pub struct",
    "pub enum",
    "pub trait",
    "export ",
    "module.exports",
    "ALTER TABLE",
    "CREATE TABLE",
    "DROP TABLE",
];

/// Lines around the issue inspected for breaking markers.
const MARKER_CONTEXT: u32 = 5;

/// Cap on files reported as affected.
const AFFECTED_CAP: usize = 8;

/// Predict the impact of fixing `issue` in `content`.
///
/// `repo_root` is walked (bounded by the crawler's file rules) to find
/// files that reference the target module by stem; this is textual
/// reachability, not a build graph, and deliberately errs broad.
pub fn predict(repo_root: &Path, issue: &Issue, content: &str) -> ImpactSummary {
    let stem = Path::new(&issue.path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut affected_files = Vec::new();
    if !stem.is_empty() && stem != "mod" && stem != "index" && stem != "lib" {
        for candidate in list_source_files(repo_root, usize::MAX) {
            let rel = candidate
                .strip_prefix(repo_root)
                .unwrap_or(&candidate)
                .to_string_lossy()
                .to_string();
            if rel == issue.path {
                continue;
            }
            if let Ok(text) = std::fs::read_to_string(&candidate) {
                if text.contains(&stem) {
                    affected_files.push(rel);
                    if affected_files.len() >= AFFECTED_CAP {
                        break;
                    }
                }
            }
        }
    }

    let breaking_change = has_breaking_markers(issue, content);
    let risk = risk_score(issue, affected_files.len(), breaking_change);

    ImpactSummary {
        affected_files,
        breaking_change,
        risk,
    }
}

fn has_breaking_markers(issue: &Issue, content: &str) -> bool {
    let lines: Vec<&str> = content.lines().collect();
    let lo = issue.line.saturating_sub(MARKER_CONTEXT + 1) as usize;
    let hi = ((issue.line + MARKER_CONTEXT) as usize).min(lines.len());
    lines[lo..hi.max(lo)]
        .iter()
        .any(|line| BREAKING_MARKERS.iter().any(|m| line.contains(m)))
}

fn risk_score(issue: &Issue, affected: usize, breaking: bool) -> f64 {
    let mut risk = 0.15;
    risk += 0.05 * affected.min(AFFECTED_CAP) as f64;
    if breaking {
        risk += 0.35;
    }
    if issue.severity == Severity::Critical {
        risk += 0.1;
    }
    if issue.kind == IssueKind::Security {
        risk += 0.05;
    }
    risk.clamp(0.0, 1.0)
}
