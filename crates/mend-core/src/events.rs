//! In-process learning event bus.
//!
//! Service modules must not import each other for learning hooks; the
//! orchestrator emits typed events and subscribers consume them. The bus
//! is synchronous: `emit` awaits every sink before returning, so learning
//! updates land inside the same unit of work as the fix record they
//! describe.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mend_state::{Fingerprint, FixRecord, Issue};

use crate::error::Result;

/// Events emitted by the orchestrator at fix-lifecycle boundaries.
#[derive(Debug, Clone)]
pub enum LearningEvent {
    /// A fix was applied to disk.
    FixApplied { fix: FixRecord, issue: Issue },
    /// A fix reached a terminal outcome (verifier reject counts as
    /// failure; monitor-window survival counts as success).
    FixOutcome {
        fix: FixRecord,
        issue: Issue,
        success: bool,
    },
    /// A regression rolled an applied fix back.
    FixRolledBack { fix: FixRecord, issue: Issue },
    /// A pattern's counters changed.
    PatternUpdated { fingerprint: Fingerprint },
}

impl LearningEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LearningEvent::FixApplied { .. } => "fix_applied",
            LearningEvent::FixOutcome { .. } => "fix_outcome",
            LearningEvent::FixRolledBack { .. } => "fix_rolled_back",
            LearningEvent::PatternUpdated { .. } => "pattern_updated",
        }
    }
}

/// A consumer of learning events.
#[async_trait]
pub trait LearningSink: Send + Sync {
    async fn handle(&self, event: &LearningEvent) -> Result<()>;
}

/// Synchronous in-process bus: sinks run in registration order, and a
/// sink error propagates to the emitter (aborting its unit of work).
#[derive(Default, Clone)]
pub struct LearningBus {
    sinks: Vec<Arc<dyn LearningSink>>,
}

impl LearningBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn LearningSink>) {
        self.sinks.push(sink);
    }

    pub async fn emit(&self, event: LearningEvent) -> Result<()> {
        debug!(event = event.name(), "learning event");
        for sink in &self.sinks {
            sink.handle(&event).await?;
        }
        Ok(())
    }
}
