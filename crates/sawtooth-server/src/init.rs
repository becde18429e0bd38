// Initialization utilities for the fetch server
//
// Structured logging setup, mirroring the existing server's init.rs.

use sawtooth_config::{LogFormat, RuntimeConfig};

/// Initialize the `tracing-subscriber` pipeline from `RuntimeConfig`:
/// env-filter + fmt, JSON formatter switchable via config.
pub fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.server.log_format {
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
        LogFormat::Text => {
            registry.with(fmt::layer()).init();
        }
    }
}
