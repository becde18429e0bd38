// Configuration source loading
//
// Loads configuration from multiple sources with priority:
// 1. Environment variables (highest)
// 2. Config file from SAWTOOTH_CONFIG path
// 3. Inline config from SAWTOOTH_CONFIG_CONTENT
// 4. Default config files (./config.toml, ./.sawtooth.toml)
// 5. Built-in defaults (lowest)

use crate::*;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const ENV_PREFIX: &str = "SAWTOOTH_";

/// Load configuration from all sources.
pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();

    if let Some(file_config) = load_from_file()? {
        merge_config(&mut config, file_config);
    }

    apply_env_overrides(&mut config)?;

    config.validate()?;

    Ok(config)
}

fn load_from_file() -> Result<Option<RuntimeConfig>> {
    if let Ok(path) = env::var("SAWTOOTH_CONFIG") {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: RuntimeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        return Ok(Some(config));
    }

    if let Ok(content) = env::var("SAWTOOTH_CONFIG_CONTENT") {
        let config: RuntimeConfig = toml::from_str(&content)
            .context("Failed to parse inline config from SAWTOOTH_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    for path in &["./config.toml", "./.sawtooth.toml"] {
        if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            let config: RuntimeConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?;
            return Ok(Some(config));
        }
    }

    Ok(None)
}

fn merge_config(base: &mut RuntimeConfig, file: RuntimeConfig) {
    base.cache = file.cache;
    base.fetch = file.fetch;
    base.sampling = file.sampling;
    base.kvstore = file.kvstore;
    base.server = file.server;
}

fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<()> {
    if let Some(val) = get_env_u64("CACHE_TTL_SECS")? {
        config.cache.ttl_secs = val;
    }
    if let Some(val) = get_env_usize("CACHE_MAX_ENTRIES")? {
        config.cache.max_entries = val;
    }

    if let Some(val) = get_env_usize("FETCH_WORKER_POOL_SIZE")? {
        config.fetch.worker_pool_size = val;
    }
    if let Some(val) = get_env_u64("FETCH_TIMEOUT_MS")? {
        config.fetch.timeout_ms = val;
    }

    if let Some(val) = get_env_f64("SAMPLING_DEFAULT_SAMPLE_PERCENT")? {
        config.sampling.default_sample_percent = val;
    }
    if let Some(val) = get_env_bool("SAMPLING_DEBUG_MODE")? {
        config.sampling.debug_mode = val;
    }
    if let Some(val) = get_env_u64("SAMPLING_CODEC_TTL_SECS")? {
        config.sampling.codec_ttl_secs = val;
    }

    if let Some(backend) = get_env_string("KVSTORE_BACKEND")? {
        config.kvstore.backend = backend
            .parse::<KvStoreBackend>()
            .context("Invalid SAWTOOTH_KVSTORE_BACKEND value")?;
    }

    if let Some(addr) = get_env_string("LISTEN_ADDR")? {
        config.server.listen_addr = addr;
    }
    if let Some(level) = get_env_string("LOG_LEVEL")? {
        config.server.log_level = level;
    }
    if let Some(format) = get_env_string("LOG_FORMAT")? {
        config.server.log_format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    Ok(())
}

fn get_env_string(key: &str) -> Result<Option<String>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match env::var(&full_key) {
        Ok(val) if !val.is_empty() => Ok(Some(val)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read env var {}", full_key)),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => Ok(Some(
            val.parse::<usize>().with_context(|| format!("{} must be a valid number", full_key))?,
        )),
        None => Ok(None),
    }
}

fn get_env_u64(key: &str) -> Result<Option<u64>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => Ok(Some(
            val.parse::<u64>().with_context(|| format!("{} must be a valid number", full_key))?,
        )),
        None => Ok(None),
    }
}

fn get_env_f64(key: &str) -> Result<Option<f64>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => Ok(Some(
            val.parse::<f64>().with_context(|| format!("{} must be a valid number", full_key))?,
        )),
        None => Ok(None),
    }
}

fn get_env_bool(key: &str) -> Result<Option<bool>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => {
            let parsed = match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => anyhow::bail!("{} must be true or false", full_key),
            };
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_config_overwrites_all_sections() {
        let mut base = RuntimeConfig::default();
        let mut file = RuntimeConfig::default();
        file.server.listen_addr = "127.0.0.1:9000".to_string();
        file.fetch.timeout_ms = 5_000;
        merge_config(&mut base, file);
        assert_eq!(base.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(base.fetch.timeout_ms, 5_000);
    }
}
