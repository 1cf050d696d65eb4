//! Tracing setup shared by the `bulkpull-server` and `bulkpull-watch` binaries.
//!
//! - `RUST_LOG` drives filtering, falling back to the binary's default directive.
//! - `BULKPULL_LOG_FORMAT=json` switches stderr output to JSON lines.
//! - `BULKPULL_LOG_DIR` adds a daily-rolling JSON file; keep the returned guard
//!   alive for the whole process or buffered lines are lost.

use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FORMAT_ENV: &str = "BULKPULL_LOG_FORMAT";
pub const LOG_DIR_ENV: &str = "BULKPULL_LOG_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Directive used when `RUST_LOG` is unset or invalid.
    pub default_directive: String,
    pub format: LogFormat,
    pub log_dir: Option<PathBuf>,
    /// File name prefix for rolled files (`<prefix>.YYYY-MM-DD`).
    pub file_prefix: String,
}

impl TracingConfig {
    /// Read format and log dir from the environment.
    pub fn from_env(default_directive: &str, file_prefix: &str) -> Self {
        Self {
            default_directive: default_directive.to_string(),
            format: LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref()),
            log_dir: std::env::var(LOG_DIR_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            file_prefix: file_prefix.to_string(),
        }
    }
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when file output is enabled.
pub fn init_tracing(config: &TracingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    let stderr_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}
