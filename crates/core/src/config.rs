// crates/core/src/config.rs
//! Service configuration.
//!
//! Load order: built-in defaults, then an optional TOML file, then
//! `BULKPULL_*` environment overrides, then [`AppConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::estimate::EstimateModel;
use crate::retry::RetryPolicy;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47890;
/// Upper bound on `jobs.page_size`.
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub estimate: EstimateConfig,
    pub push: PushConfig,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `None` means the platform data dir (`<data_dir>/bulkpull/bulkpull.db`).
    pub db_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Admission gate: jobs allowed in `running` at once, across all owners.
    pub max_running: usize,
    pub page_size: u32,
    pub fetch_timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Shared upstream request rate; 0 disables the limiter.
    pub requests_per_second: f64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_running: 4,
            page_size: 100,
            fetch_timeout_secs: 30,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            requests_per_second: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateConfig {
    pub per_page_latency_ms: u64,
    pub warning_threshold: u64,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            per_page_latency_ms: 1_200,
            warning_threshold: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub heartbeat_secs: u64,
    pub auth_timeout_secs: u64,
    /// Per-connection outbound queue length.
    pub channel_capacity: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            auth_timeout_secs: 10,
            channel_capacity: 256,
        }
    }
}

/// One configured upstream. `name` is the data-source handle clients send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    /// Name of the env var holding the bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

fn default_source_timeout() -> u64 {
    30
}

impl AppConfig {
    /// Defaults, overlaid with `path` when given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("BULKPULL_PORT").or_else(|| get("PORT")) {
            self.server.port = parse_env("BULKPULL_PORT", &port)?;
        }
        if let Some(host) = get("BULKPULL_HOST") {
            self.server.host = host;
        }
        if let Some(path) = get("BULKPULL_DB_PATH") {
            self.server.db_path = Some(PathBuf::from(path));
        }
        if let Some(v) = get("BULKPULL_MAX_RUNNING_JOBS") {
            self.jobs.max_running = parse_env("BULKPULL_MAX_RUNNING_JOBS", &v)?;
        }
        if let Some(v) = get("BULKPULL_PAGE_SIZE") {
            self.jobs.page_size = parse_env("BULKPULL_PAGE_SIZE", &v)?;
        }
        if let Some(v) = get("BULKPULL_RATE_LIMIT_RPS") {
            self.jobs.requests_per_second = parse_env("BULKPULL_RATE_LIMIT_RPS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.page_size == 0 || self.jobs.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "jobs.page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if self.jobs.max_running == 0 {
            return Err(ConfigError::Invalid("jobs.max_running must be at least 1".into()));
        }
        if self.jobs.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "jobs.fetch_timeout_secs must be at least 1".into(),
            ));
        }
        if self.jobs.max_attempts == 0 {
            return Err(ConfigError::Invalid("jobs.max_attempts must be at least 1".into()));
        }
        if self.jobs.requests_per_second < 0.0 || !self.jobs.requests_per_second.is_finite() {
            return Err(ConfigError::Invalid(
                "jobs.requests_per_second must be a non-negative number".into(),
            ));
        }
        if let Some(dup) = self
            .sources
            .iter()
            .enumerate()
            .find(|(i, s)| self.sources[..*i].iter().any(|o| o.name == s.name))
        {
            return Err(ConfigError::Invalid(format!(
                "duplicate source name: {}",
                dup.1.name
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.jobs.max_attempts,
            base_delay: Duration::from_millis(self.jobs.base_delay_ms),
            max_delay: Duration::from_millis(self.jobs.max_delay_ms),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.jobs.fetch_timeout_secs)
    }

    pub fn estimate_model(&self) -> EstimateModel {
        EstimateModel {
            page_size: self.jobs.page_size,
            per_page_latency: Duration::from_millis(self.estimate.per_page_latency_ms),
            warning_threshold: self.estimate.warning_threshold,
            fetch_timeout: self.fetch_timeout(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
