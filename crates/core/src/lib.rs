// crates/core/src/lib.rs
//! Domain core for bulkpull: the upstream provider seam, pre-flight
//! estimation, retry/backoff, rate limiting, input validation and
//! configuration. No storage and no transport live here.

pub mod config;
pub mod error;
pub mod estimate;
pub mod rate_limit;
pub mod retry;
pub mod sink;
pub mod upstream;
pub mod validate;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{AppConfig, SourceConfig};
pub use error::{ConfigError, EstimateError, SinkError, UpstreamError, ValidationError};
pub use estimate::{EstimateModel, EstimateService};
pub use rate_limit::RateLimiter;
pub use retry::{backoff_delay, RetryPolicy};
pub use sink::RecordSink;
pub use upstream::{ProviderRegistry, SearchPage, SearchProvider, SourceRecord};
