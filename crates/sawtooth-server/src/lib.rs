//! Axum HTTP server exposing the fetch core: `POST
//! /v1/fetch/group-bys`, `POST /v1/fetch/join`, `/health`, `/ready`.
//!
//! Every generic collaborator (`MetadataLoader`, `JoinConfigLoader`,
//! `KvStore`, `LogSink`) is fixed here to the one concrete implementation
//! this workspace ships of each - the same way the existing server crate
//! fixes its storage backend at the HTTP boundary, not in the library
//! crates underneath it.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::signal;
use tracing::info;

use sawtooth_cache::ServingInfoCache;
use sawtooth_config::RuntimeConfig;
use sawtooth_fetch::{GroupByFetcher, JoinPlanner, LoggingSampler};
use sawtooth_kvstore::InMemoryKvStore;

pub mod handlers;
pub mod init;
pub mod registry;

use handlers::{handle_fetch_group_bys, handle_fetch_join, health_check, ready_check};
use init::init_tracing;
use registry::{RegistryFile, StaticJoinLoader, StaticMetadataLoader, TracingLogSink};

type Loader = StaticMetadataLoader;
type Store = InMemoryKvStore;
type Cache = ServingInfoCache<Loader>;
type Fetcher = GroupByFetcher<Loader, Store>;
type Planner = JoinPlanner<StaticJoinLoader, Loader, Store>;
type Sampler = LoggingSampler<StaticJoinLoader, Loader, Store, TracingLogSink>;

/// Shared application state, cloned cheaply (every field is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub group_by: Arc<Fetcher>,
    pub sampler: Arc<Sampler>,
    pub config: Arc<RuntimeConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/fetch/group-bys", post(handle_fetch_group_bys))
        .route("/v1/fetch/join", post(handle_fetch_join))
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .with_state(state)
}

fn build_state(config: RuntimeConfig, registry: RegistryFile) -> AppState {
    let loader = StaticMetadataLoader::new(&registry);
    let cache: Arc<Cache> = Arc::new(ServingInfoCache::new(loader, config.cache.ttl()));
    let store = Arc::new(InMemoryKvStore::new());
    let group_by: Arc<Fetcher> =
        Arc::new(GroupByFetcher::new(cache, store, config.fetch.worker_pool_size, config.fetch.timeout()));

    let join_loader = StaticJoinLoader::new(&registry, config.sampling.default_sample_percent);
    let planner: Arc<Planner> = Arc::new(JoinPlanner::new(join_loader, group_by.clone()));
    let sampler: Arc<Sampler> = Arc::new(LoggingSampler::new(
        planner,
        Arc::new(TracingLogSink),
        config.sampling.codec_ttl(),
        config.sampling.debug_mode,
    ));

    AppState { group_by, sampler, config: Arc::new(config) }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
}

/// Entry point used by the `serve` CLI subcommand. `registry_path` is `None`
/// for an empty registry (useful for smoke tests); `Some(path)` loads a TOML
/// registry file of feature sets and joins. The registry's own storage is
/// external in production; this is a local/dev stand-in.
pub async fn run(config: RuntimeConfig, registry_path: Option<&std::path::Path>) -> Result<()> {
    init_tracing(&config);

    let registry = match registry_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read registry file: {}", path.display()))?;
            RegistryFile::load_from_str(&content)
                .with_context(|| format!("failed to parse registry file: {}", path.display()))?
        }
        None => RegistryFile::empty(),
    };

    let addr = config.server.listen_addr.clone();
    let state = build_state(config, registry);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!("sawtooth fetch server listening on http://{}", addr);
    info!("  POST http://{}/v1/fetch/group-bys", addr);
    info!("  POST http://{}/v1/fetch/join", addr);
    info!("  GET  http://{}/health", addr);
    info!("  GET  http://{}/ready", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("server error")?;

    info!("server shutdown complete");
    Ok(())
}
