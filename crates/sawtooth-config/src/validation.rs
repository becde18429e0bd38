// Configuration validation
//
// Validates that required fields are present and values are sensible.

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_cache_config(&config.cache)?;
    validate_fetch_config(&config.fetch)?;
    validate_sampling_config(&config.sampling)?;
    validate_server_config(&config.server)?;
    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<()> {
    if config.ttl_secs == 0 {
        bail!("cache.ttl_secs must be greater than 0");
    }
    if config.max_entries == 0 {
        bail!("cache.max_entries must be greater than 0");
    }
    if config.max_entries > 10_000_000 {
        warn!(max_entries = config.max_entries, "cache.max_entries is very large; may cause memory issues");
    }
    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<()> {
    if config.worker_pool_size == 0 {
        bail!("fetch.worker_pool_size must be greater than 0");
    }
    if config.timeout_ms == 0 {
        bail!("fetch.timeout_ms must be greater than 0");
    }
    Ok(())
}

fn validate_sampling_config(config: &SamplingConfig) -> Result<()> {
    if !(0.0..=100.0).contains(&config.default_sample_percent) {
        bail!("sampling.default_sample_percent must be between 0 and 100");
    }
    if config.codec_ttl_secs == 0 {
        bail!("sampling.codec_ttl_secs must be greater than 0");
    }
    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.listen_addr.is_empty() {
        bail!("server.listen_addr must not be empty");
    }
    if !config.listen_addr.contains(':') {
        bail!("server.listen_addr must be in format 'host:port'");
    }
    Ok(())
}
