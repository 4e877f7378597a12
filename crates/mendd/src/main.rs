//! Mend daemon entry point.
//!
//! Boots the service context from the environment (object store, cache,
//! queue, model), mounts the HTTP API, and spawns the worker fleet.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn, Level};

use mend_core::{
    Config, DetectorRegistry, HttpModelClient, PathLocks, ServiceContext, SystemClock,
};
use mend_state::{CacheHandle, MemoryCache, MemoryQueue, MemoryStore, NullCache, SurrealStore};

use mendd::{routes, workers, AppState};

/// Default model completion endpoint; overridable for self-hosted models.
const DEFAULT_MODEL_ENDPOINT: &str = "https://models.mendworks.dev/v1/complete";

async fn build_context(config: Config) -> Result<ServiceContext> {
    let store: Arc<dyn mend_state::ObjectStore> = if config.object_store_url == "mem://" {
        warn!("OBJECT_STORE_URL is mem://; state will not survive restarts");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SurrealStore::connect(&config.object_store_url, config.object_store_key.as_deref())
                .await
                .context("object store connection failed")?,
        )
    };

    let cache = match config.cache_url.as_deref() {
        Some("mem://") => CacheHandle::new(Arc::new(MemoryCache::new())),
        Some(other) => {
            warn!(url = other, "unsupported cache url; running without cache");
            CacheHandle::new(Arc::new(NullCache::new()))
        }
        None => {
            info!("CACHE_URL absent; running without cache");
            CacheHandle::new(Arc::new(NullCache::new()))
        }
    };

    if config.queue_url != "mem://" {
        anyhow::bail!(
            "QUEUE_URL {} is not supported; the built-in queue backend is mem://",
            config.queue_url
        );
    }
    let queue = Arc::new(MemoryQueue::new());

    let api_key = config
        .model_api_key
        .clone()
        .context("MODEL_API_KEY is required")?;
    let endpoint =
        std::env::var("MODEL_ENDPOINT").unwrap_or_else(|_| DEFAULT_MODEL_ENDPOINT.to_string());
    let model = Arc::new(HttpModelClient::new(endpoint, api_key));

    Ok(ServiceContext {
        store,
        cache,
        queue,
        model,
        clock: Arc::new(SystemClock),
        detectors: Arc::new(DetectorRegistry::with_builtins()),
        locks: Arc::new(PathLocks::new()),
        config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    mend_core::init_tracing(std::env::var("LOG_JSON").is_ok(), Level::INFO);

    let config = Config::from_env().context("configuration")?;
    let ctx = build_context(config).await?;
    let app_state = AppState::new(ctx);
    workers::spawn_workers(app_state.clone());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, version = mend_core::VERSION, "mendd listening");

    let app = routes::router(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
