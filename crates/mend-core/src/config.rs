//! Environment-driven configuration.
//!
//! Parsed once at boot into a [`Config`] value and passed through the
//! [`crate::context::ServiceContext`]; nothing reads the environment after
//! startup.

use std::time::Duration;

use crate::error::{MendError, Result};

/// Default auto-apply confidence threshold.
pub const DEFAULT_APPLY_THRESHOLD: f64 = 0.80;

/// Default risk cap above which fixes are never auto-applied.
pub const DEFAULT_RISK_CAP: f64 = 0.70;

/// Default monitor window.
pub const DEFAULT_MONITOR_WINDOW_SECS: u64 = 86_400;

/// Default cap on files per crawl.
pub const DEFAULT_CRAWL_FILE_BUDGET: usize = 2_000;

/// Default concurrent worker tasks per process.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;

/// Health score below which files are queued for rescan.
pub const DEFAULT_HEALTH_RESCAN_THRESHOLD: u8 = 70;

/// Runtime configuration for the Mend core.
#[derive(Debug, Clone)]
pub struct Config {
    pub object_store_url: String,
    pub object_store_key: Option<String>,
    /// Absent disables the cache entirely (NullCache mode).
    pub cache_url: Option<String>,
    pub queue_url: String,
    pub model_api_key: Option<String>,
    pub webhook_secret_default: String,
    pub apply_threshold: f64,
    pub risk_cap: f64,
    pub monitor_window: Duration,
    pub crawl_file_budget: usize,
    pub worker_concurrency: usize,
    pub health_rescan_threshold: u8,
    pub predict_deadline: Duration,
    pub generate_deadline: Duration,
    pub verify_deadline: Duration,
    pub apply_deadline: Duration,
    /// Model calls allowed per minute before stage 4 pauses.
    pub model_rate_limit_per_min: u64,
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// `OBJECT_STORE_URL`, `QUEUE_URL`, and `MODEL_API_KEY` are required
    /// for the deployed daemon; the embedded path uses [`Config::local`].
    pub fn from_env() -> Result<Self> {
        let object_store_url = require("OBJECT_STORE_URL")?;
        let object_store_key = std::env::var("OBJECT_STORE_KEY").ok();
        let queue_url = require("QUEUE_URL")?;
        let model_api_key = Some(require("MODEL_API_KEY")?);

        Ok(Self {
            object_store_url,
            object_store_key,
            cache_url: std::env::var("CACHE_URL").ok(),
            queue_url,
            model_api_key,
            webhook_secret_default: std::env::var("WEBHOOK_SECRET_DEFAULT").unwrap_or_default(),
            apply_threshold: parse_var("AUTO_APPLY_THRESHOLD", DEFAULT_APPLY_THRESHOLD)?,
            risk_cap: parse_var("AUTO_APPLY_RISK_CAP", DEFAULT_RISK_CAP)?,
            monitor_window: Duration::from_secs(parse_var(
                "MONITOR_WINDOW_SECONDS",
                DEFAULT_MONITOR_WINDOW_SECS,
            )?),
            crawl_file_budget: parse_var("CRAWL_FILE_BUDGET", DEFAULT_CRAWL_FILE_BUDGET)?,
            worker_concurrency: parse_var("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?,
            health_rescan_threshold: DEFAULT_HEALTH_RESCAN_THRESHOLD,
            predict_deadline: Duration::from_secs(5),
            generate_deadline: Duration::from_secs(60),
            verify_deadline: Duration::from_secs(10),
            apply_deadline: Duration::from_secs(10),
            model_rate_limit_per_min: 60,
        })
    }

    /// Configuration for the embedded in-memory stack (tests, local CLI).
    pub fn local() -> Self {
        Self {
            object_store_url: "mem://".to_string(),
            object_store_key: None,
            cache_url: None,
            queue_url: "mem://".to_string(),
            model_api_key: None,
            webhook_secret_default: String::new(),
            apply_threshold: DEFAULT_APPLY_THRESHOLD,
            risk_cap: DEFAULT_RISK_CAP,
            monitor_window: Duration::from_secs(DEFAULT_MONITOR_WINDOW_SECS),
            crawl_file_budget: DEFAULT_CRAWL_FILE_BUDGET,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            health_rescan_threshold: DEFAULT_HEALTH_RESCAN_THRESHOLD,
            predict_deadline: Duration::from_secs(5),
            generate_deadline: Duration::from_secs(60),
            verify_deadline: Duration::from_secs(10),
            apply_deadline: Duration::from_secs(10),
            model_rate_limit_per_min: 60,
        }
    }
}

fn require(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| MendError::Config(format!("{name} is required")))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| MendError::Config(format!("{name} is not a valid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_defaults() {
        let config = Config::local();
        assert_eq!(config.apply_threshold, DEFAULT_APPLY_THRESHOLD);
        assert_eq!(config.risk_cap, DEFAULT_RISK_CAP);
        assert_eq!(config.crawl_file_budget, DEFAULT_CRAWL_FILE_BUDGET);
        assert!(config.cache_url.is_none());
    }
}
