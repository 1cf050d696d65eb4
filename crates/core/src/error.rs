// crates/core/src/error.rs
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to an upstream search provider.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream server error: HTTP {status}")]
    Server { status: u16 },

    #[error("upstream rejected request: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Timeouts, rate limits, 5xx and connection failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout(_)
                | UpstreamError::RateLimited { .. }
                | UpstreamError::Server { .. }
                | UpstreamError::Unreachable(_)
        )
    }

    /// Server-provided delay hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Rejected input shape at `estimate` / `start`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("query must have search terms or at least one filter")]
    EmptyQuery,

    #[error("filter keys must not be blank")]
    BlankFilterKey,

    #[error("filter `{key}` must be a scalar or a list of scalars")]
    InvalidFilter { key: String },

    #[error("maxRecords must be greater than zero")]
    InvalidMaxRecords,

    #[error("table name must not be blank")]
    EmptyTableName,

    #[error("table name exceeds {max} characters")]
    TableNameTooLong { max: usize },

    #[error("unknown data source: {0}")]
    UnknownSource(String),
}

/// Failures from `EstimateService::estimate`.
#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("invalid estimate request: {0}")]
    Invalid(#[from] ValidationError),

    #[error("estimate failed: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Failures writing records to table storage.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("storage write failed: {0}")]
    Write(String),
}

/// Failures loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}
