//! Mend Core Library
//!
//! The engineering core of the Mend code-quality platform: detectors,
//! fingerprints, the fix generator and verifier, the ten-stage fix
//! orchestrator, the crawler, expert guides, and outcome learning.
//! Persistence lives in `mend-state`; the HTTP front in `mendd`.

pub mod config;
pub mod context;
pub mod crawl;
pub mod detect;
pub mod error;
pub mod events;
pub mod experts;
pub mod fingerprint;
pub mod generate;
pub mod health;
pub mod impact;
pub mod learning;
pub mod locks;
pub mod metrics;
pub mod orchestrate;
pub mod telemetry;
pub mod verify;
pub mod watch;

pub use config::Config;
pub use context::{Clock, ManualClock, ServiceContext, SystemClock};
pub use crawl::{list_source_files, CrawlOptions, CrawlStats, Crawler};
pub use detect::{Detector, DetectorRegistry, FileContext};
pub use error::{MendError, Result};
pub use events::{LearningBus, LearningEvent, LearningSink};
pub use experts::{onboard, profile_stack, relevant_guides, revise_guide};
pub use fingerprint::{issue_fingerprint, normalize_message};
pub use generate::{FixGenerator, FnModel, GeneratedFix, HttpModelClient, ModelClient, ScriptedModel};
pub use health::score_file;
pub use learning::LearningService;
pub use locks::{PathLockGuard, PathLocks};
pub use metrics::METRICS;
pub use orchestrate::{OrchestrationOutcome, Orchestrator, PriorityClass};
pub use telemetry::init_tracing;
pub use verify::{FixVerifier, Hunk, Patch};
pub use watch::RepoWatcher;

/// Mend version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
