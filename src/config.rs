//! Configuration management for Slidegate.
//!
//! Settings are layered, lowest precedence first: built-in defaults, an
//! optional YAML file, `SLIDEGATE__SECTION__KEY` environment variables, and
//! finally the bare `RATE_LIMIT_*` variables older deployments export.
//! `NODE_ENV=test` switches the limiter off.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SlidegateError};
use crate::ratelimit::LimiterConfig;

/// Main configuration for the Slidegate service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Whether requests are counted at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Requests admitted per client within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Trailing window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Only paths starting with this prefix are limited
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,

    /// Interval between background sweeps, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            route_prefix: default_route_prefix(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_requests() -> u32 {
    90
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_route_prefix() -> String {
    "/threads".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

impl RateLimitSettings {
    /// The limiter's slice of these settings.
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            window_ms: self.window_ms,
            max_requests: self.max_requests,
            enabled: self.enabled,
        }
    }

    /// Interval between background sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        self.limiter_config().validate()?;
        if self.sweep_interval_secs == 0 {
            return Err(SlidegateError::Config(
                "rate_limit.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if !self.route_prefix.starts_with('/') || self.route_prefix.trim_matches('/').is_empty() {
            return Err(SlidegateError::Config(format!(
                "rate_limit.route_prefix must be an absolute, non-root path, got {:?}",
                self.route_prefix
            )));
        }
        Ok(())
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, one event per line
    #[default]
    Text,
    /// Newline-delimited JSON
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from an optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Load settings from an optional file plus the given environment map.
    pub fn load_with_env(path: Option<&Path>, env: config::Map<String, String>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder
            .add_source(
                config::Environment::with_prefix("SLIDEGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            )
            .set_override_option("rate_limit.max_requests", legacy_var(&env, "RATE_LIMIT_MAX"))?
            .set_override_option("rate_limit.window_ms", legacy_var(&env, "RATE_LIMIT_WINDOW_MS"))?
            .set_override_option("rate_limit.enabled", legacy_var(&env, "RATE_LIMIT_ENABLED"))?;

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if env.get("NODE_ENV").map(String::as_str) == Some("test") {
            settings.rate_limit.enabled = false;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a YAML file path, without environment layering.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| SlidegateError::Config(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()
    }
}

/// A `RATE_LIMIT_*` value; set-but-empty counts as unset.
fn legacy_var(env: &config::Map<String, String>, name: &str) -> Option<String> {
    env.get(name).filter(|value| !value.is_empty()).cloned()
}
