// Entry point: `sawtooth serve` runs the HTTP fetch server, `sawtooth fetch`
// issues a one-off request against a registry file without starting a
// listener - handy for checking a registry's shape in a deploy pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sawtooth_cache::ServingInfoCache;
use sawtooth_config::RuntimeConfig;
use sawtooth_core::{FeatureValue, Request, ValueMap};
use sawtooth_fetch::{GroupByFetcher, JoinPlanner, LoggingSampler};
use sawtooth_kvstore::InMemoryKvStore;
use sawtooth_server::registry::{RegistryFile, StaticJoinLoader, StaticMetadataLoader, TracingLogSink};

#[derive(Parser)]
#[command(name = "sawtooth", about = "Online feature-fetching service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP fetch server (default if no subcommand is given).
    Serve {
        /// Path to a TOML config file (overrides SAWTOOTH_CONFIG / defaults).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the listen address's port.
        #[arg(long)]
        port: Option<u16>,
        /// Override the tracing log level (e.g. "info", "debug").
        #[arg(long)]
        log_level: Option<String>,
        /// TOML file listing feature sets and joins this deployment serves.
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Issue a single join fetch against a registry file and print the result.
    Fetch {
        /// Name of the join to query.
        #[arg(long)]
        join: String,
        /// Comma-separated key=value pairs, e.g. "user=u1,merchant=m2".
        #[arg(long)]
        keys: String,
        /// Query as of this epoch-millis timestamp (defaults to now).
        #[arg(long)]
        at_millis: Option<i64>,
        /// TOML file listing feature sets and joins to query against.
        #[arg(long)]
        registry: PathBuf,
    },
}

fn apply_cli_overrides(config: &mut RuntimeConfig, port: Option<u16>, log_level: Option<String>) {
    if let Some(port) = port {
        let host = config.server.listen_addr.rsplit_once(':').map(|(h, _)| h).unwrap_or("0.0.0.0");
        config.server.listen_addr = format!("{host}:{port}");
    }
    if let Some(level) = log_level {
        config.server.log_level = level;
    }
}

fn load_registry(path: &std::path::Path) -> Result<RegistryFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read registry file: {}", path.display()))?;
    RegistryFile::load_from_str(&content).with_context(|| format!("failed to parse registry file: {}", path.display()))
}

fn parse_keys(raw: &str) -> ValueMap {
    let mut keys = ValueMap::new();
    for pair in raw.split(',').filter(|s| !s.is_empty()) {
        if let Some((k, v)) = pair.split_once('=') {
            keys.insert(k.trim().to_string(), FeatureValue::Str(v.trim().to_string()));
        }
    }
    keys
}

async fn run_fetch(join: String, keys: String, at_millis: Option<i64>, registry_path: PathBuf) -> Result<()> {
    let registry = load_registry(&registry_path)?;
    let config = RuntimeConfig::default();

    let loader = StaticMetadataLoader::new(&registry);
    let cache = Arc::new(ServingInfoCache::new(loader, config.cache.ttl()));
    let store = Arc::new(InMemoryKvStore::new());
    let group_by = Arc::new(GroupByFetcher::new(cache, store, config.fetch.worker_pool_size, config.fetch.timeout()));

    let join_loader = StaticJoinLoader::new(&registry, config.sampling.default_sample_percent);
    let planner = Arc::new(JoinPlanner::new(join_loader, group_by));
    let sampler = LoggingSampler::new(planner, Arc::new(TracingLogSink), Duration::from_secs(60), false);

    let request = Request { name: join, keys: parse_keys(&keys), at_millis };
    let response = sampler.fetch(vec![request]).await.into_iter().next().unwrap();

    match response.outcome {
        Ok(values) => println!("{}", serde_json::to_string_pretty(&values)?),
        Err(err) => {
            eprintln!("fetch failed: {}", err);
            std::process::exit(1);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve { config: None, port: None, log_level: None, registry: None }) {
        Command::Serve { config, port, log_level, registry } => {
            let mut runtime_config = match config {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read config file: {}", path.display()))?;
                    toml::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.display()))?
                }
                None => sawtooth_config::load_config()?,
            };
            apply_cli_overrides(&mut runtime_config, port, log_level);
            runtime_config.validate()?;

            sawtooth_server::run(runtime_config, registry.as_deref()).await
        }
        Command::Fetch { join, keys, at_millis, registry } => run_fetch(join, keys, at_millis, registry).await,
    }
}
