//! Upstream search provider seam.
//!
//! A provider answers one page of a paginated query at a time and reports the
//! total record count alongside every page.

pub mod http;
pub mod registry;

use async_trait::async_trait;
use bulkpull_types::SearchQuery;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

pub use http::HttpSearchProvider;
pub use registry::ProviderRegistry;

/// One record as returned by the upstream, keyed by its source id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// One page of results plus the upstream's total-count metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub records: Vec<SourceRecord>,
    pub total_records: u64,
}

/// Trait for paginated upstream search providers.
///
/// Implementations include:
/// - `HttpSearchProvider`: JSON over HTTP
/// - `testing::ScriptedProvider`: deterministic pages for tests
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Fetch page `page` (1-based) of `query` with `per_page` records.
    async fn fetch_page(
        &self,
        query: &SearchQuery,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, UpstreamError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
