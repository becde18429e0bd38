// sawtooth-config - Unified configuration for the fetch service
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from SAWTOOTH_CONFIG env var
// 3. Config file contents from SAWTOOTH_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.sawtooth.toml)
// 5. Built-in defaults (lowest priority)

use serde::{Deserialize, Serialize};
use std::time::Duration;

mod sources;
mod validation;

pub use sources::load_config;

/// Main runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub kvstore: KvStoreConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl RuntimeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validation::validate_config(self)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            sampling: SamplingConfig::default(),
            kvstore: KvStoreConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Serving-info cache sizing (backs `sawtooth_cache::ServingInfoCache`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 60, max_entries: 100_000 }
    }
}

/// Group-By Fetcher worker pool and deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { worker_pool_size: default_worker_pool_size(), timeout_ms: default_timeout_ms() }
    }
}

/// Logging Sampler defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Used when a Join does not declare its own `sample_percent`.
    pub default_sample_percent: f64,
    /// Disables the ~1% sink-failure log rate limit.
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default = "default_codec_ttl_secs")]
    pub codec_ttl_secs: u64,
}

fn default_codec_ttl_secs() -> u64 {
    300
}

impl SamplingConfig {
    pub fn codec_ttl(&self) -> Duration {
        Duration::from_secs(self.codec_ttl_secs)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { default_sample_percent: 1.0, debug_mode: false, codec_ttl_secs: default_codec_ttl_secs() }
    }
}

/// Selects which `KvStore` implementation the fetch service constructs.
/// Only `Memory` is implemented; the variant exists so a future
/// backend can be added without reshaping the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvStoreBackend {
    Memory,
}

impl std::fmt::Display for KvStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvStoreBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for KvStoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(KvStoreBackend::Memory),
            _ => anyhow::bail!("Unsupported kvstore backend: {}. Supported: memory", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvStoreConfig {
    pub backend: KvStoreBackend,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self { backend: KvStoreBackend::Memory }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}
