//! Configuration loading for the admin data layer.
//!
//! Endpoints are required. The cache, retry and reconnect sections fall back
//! to the dashboard's defaults when omitted.

use adminsync_cache::{CacheConfig, RetryPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "ADMINSYNC_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminSyncConfig {
    pub api_base_url: String,
    pub ws_url: String,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_true")]
    pub ws_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_login_route")]
    pub login_route: String,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_reconnect_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_reconnect_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub jitter_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_reconnect_initial_ms(),
            max_ms: default_reconnect_max_ms(),
            multiplier: default_reconnect_multiplier(),
            max_attempts: default_reconnect_max_attempts(),
            jitter_ms: 0,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    /// Where the file-backed credential store keeps the token. In-memory
    /// when absent.
    pub token_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or ADMINSYNC_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl AdminSyncConfig {
    /// Config with the given endpoints and every other field at its default.
    pub fn new(api_base_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ws_url: ws_url.into(),
            ws_path: default_ws_path(),
            ws_enabled: true,
            auto_connect: true,
            request_timeout_ms: default_request_timeout_ms(),
            login_route: default_login_route(),
            cache: CacheSection::default(),
            reconnect: ReconnectConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AdminSyncConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !has_scheme(&self.api_base_url, &["http://", "https://"]) {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.ws_enabled {
            if self.ws_url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "ws_url",
                    reason: "must not be empty when ws_enabled".to_string(),
                });
            }
            if !has_scheme(&self.ws_url, &["http://", "https://", "ws://", "wss://"]) {
                return Err(ConfigError::InvalidValue {
                    field: "ws_url",
                    reason: "must start with http(s):// or ws(s)://".to_string(),
                });
            }
        }
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "ws_path",
                reason: "must start with '/'".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if !self.login_route.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "login_route",
                reason: "must start with '/'".to_string(),
            });
        }
        if self.cache.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.sweep_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.retry.max_delay_ms < self.cache.retry.base_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "cache.retry.max_delay_ms",
                reason: "must be >= base_delay_ms".to_string(),
            });
        }
        if self.reconnect.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_attempts",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.connect_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// WebSocket URL: `ws_url` with an http(s) scheme mapped to ws(s), joined
    /// with `ws_path`.
    pub fn ws_endpoint(&self) -> String {
        let base = self.ws_url.trim().trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}{}", base, self.ws_path)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new().with_sweep_interval(Duration::from_millis(self.cache.sweep_interval_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.cache.retry.attempts,
            Duration::from_millis(self.cache.retry.base_delay_ms),
            Duration::from_millis(self.cache.retry.max_delay_ms),
        )
    }
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    let url = url.trim();
    schemes.iter().any(|scheme| url.starts_with(scheme))
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/admin/socket.io".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_login_route() -> String {
    "/login".to_string()
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    5_000
}

fn default_reconnect_multiplier() -> f64 {
    2.0
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
