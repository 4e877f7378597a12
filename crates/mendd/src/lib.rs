//! Mend daemon library: router, webhook handling, shared state, workers.
//!
//! Split from the binary so the HTTP surface is testable with
//! `tower::ServiceExt` against an in-memory context.

pub mod routes;
pub mod state;
pub mod webhook;
pub mod workers;

pub use routes::router;
pub use state::AppState;
