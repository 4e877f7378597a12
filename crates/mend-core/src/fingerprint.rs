//! Stable defect fingerprints.
//!
//! A fingerprint identifies "the same defect" across runs: a hash over the
//! issue kind, a normalized message, the path, and the detector id. The
//! normalization strips the parts of a message that vary run-to-run (line
//! numbers, counts, quoted fragments) so one defect never splits into many
//! fingerprints.

use mend_state::{Fingerprint, IssueKind};

/// Normalize a detector message for fingerprinting.
///
/// Lowercases, replaces digit runs with `#`, drops quoted fragments, and
/// collapses whitespace.
pub fn normalize_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut in_quote: Option<char> = None;
    let mut last_was_hash = false;
    let mut last_was_space = false;

    for c in message.chars() {
        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => {
                in_quote = Some(c);
            }
            c if c.is_ascii_digit() => {
                if !last_was_hash {
                    out.push('#');
                    last_was_hash = true;
                    last_was_space = false;
                }
            }
            c if c.is_whitespace() => {
                if !last_was_space && !out.is_empty() {
                    out.push(' ');
                    last_was_space = true;
                }
                last_was_hash = false;
            }
            c => {
                out.extend(c.to_lowercase());
                last_was_hash = false;
                last_was_space = false;
            }
        }
    }

    out.trim_end().to_string()
}

/// Compute the stable fingerprint for a detected issue.
pub fn issue_fingerprint(
    kind: IssueKind,
    message: &str,
    path: &str,
    detector_id: &str,
) -> Fingerprint {
    Fingerprint::from_parts(kind.as_str(), &normalize_message(message), path, detector_id)
}
