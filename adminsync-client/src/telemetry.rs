//! Tracing subscriber setup.
//!
//! Libraries in this workspace only emit `tracing` events; the embedding
//! application calls [`init_tracing`] once at startup to see them.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "adminsync=debug,info";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    /// JSON lines when true, human-readable otherwise.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            json: std::env::var("ADMINSYNC_LOG_FORMAT")
                .map(|format| !format.eq_ignore_ascii_case("pretty"))
                .unwrap_or(true),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to init subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber with the default configuration.
pub fn init_tracing() -> Result<(), TelemetryError> {
    init_tracing_with(&TelemetryConfig::default())
}

pub fn init_tracing_with(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(config.json.then(|| fmt::layer().json()))
        .with((!config.json).then(|| fmt::layer()))
        .try_init()?;

    tracing::info!(json = config.json, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_filter, DEFAULT_FILTER);
        assert!(EnvFilter::try_new(&config.default_filter).is_ok());
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig {
            json: false,
            ..TelemetryConfig::default()
        };
        // Whichever test installs first wins; after that every init fails.
        let _ = init_tracing_with(&config);
        assert!(init_tracing_with(&config).is_err());
    }
}
