//! Detector trait and registry.
//!
//! A detector turns (path, file bytes, project metadata) into an ordered
//! list of issues with stable fingerprints. Detectors must be pure with
//! respect to their inputs — no hidden state — so that fingerprint
//! deduplication works across runs and workers.
//!
//! The registry is built once at startup, keyed by string id. There is no
//! dynamic loading: plugging in a detector means registering it here.

mod builtin;

pub use builtin::{
    DebugLogScanner, ErrorSwallowScanner, LongLineScanner, SecretScanner, TodoScanner,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use mend_state::{Issue, IssueKind, NewIssue, Project};

/// Inputs a detector sees for one file.
pub struct FileContext<'a> {
    pub project: &'a Project,
    pub path: &'a str,
    pub bytes: &'a [u8],
}

impl<'a> FileContext<'a> {
    /// The file as UTF-8 text; lossy so binary junk cannot panic a detector.
    pub fn text(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.bytes)
    }
}

/// A pluggable analyzer producing issues from file content.
pub trait Detector: Send + Sync {
    /// Stable identifier; part of every fingerprint this detector emits.
    fn id(&self) -> &str;

    /// Issue kinds this detector can raise.
    fn kinds(&self) -> &[IssueKind];

    /// Analyze one file. Must be pure: same inputs, same issues.
    fn detect(&self, ctx: &FileContext<'_>) -> Vec<NewIssue>;

    /// Re-check hook used by the verify stage: does this detector still
    /// raise the given issue's fingerprint on (patched) content?
    fn reraises(&self, ctx: &FileContext<'_>, issue: &Issue) -> bool {
        self.detect(ctx)
            .iter()
            .any(|n| n.fingerprint == issue.fingerprint)
    }
}

/// String-keyed detector registry, built at startup.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: BTreeMap<String, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every builtin detector.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TodoScanner));
        registry.register(Arc::new(SecretScanner));
        registry.register(Arc::new(ErrorSwallowScanner));
        registry.register(Arc::new(LongLineScanner));
        registry.register(Arc::new(DebugLogScanner));
        registry
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.insert(detector.id().to_string(), detector);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Detector>> {
        self.detectors.get(id).cloned()
    }

    /// All detectors in id order, so detection output is deterministic.
    pub fn all(&self) -> Vec<Arc<dyn Detector>> {
        self.detectors.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}
