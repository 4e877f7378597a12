//! Shared daemon state.

use std::sync::Arc;

use mend_core::{Crawler, Orchestrator, ServiceContext};

/// Queue depth beyond which new crawl requests are refused with 429.
/// Webhooks are never refused; their overflow is absorbed by the DLQ.
pub const DEFAULT_HIGH_WATER: usize = 1_000;

/// State shared by every request handler and worker.
#[derive(Clone)]
pub struct AppState {
    pub ctx: ServiceContext,
    pub orchestrator: Arc<Orchestrator>,
    pub crawler: Arc<Crawler>,
    pub high_water: usize,
}

impl AppState {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(ctx.clone())),
            crawler: Arc::new(Crawler::new(ctx.clone())),
            ctx,
            high_water: DEFAULT_HIGH_WATER,
        }
    }

    pub fn with_high_water(mut self, high_water: usize) -> Self {
        self.high_water = high_water;
        self
    }
}
