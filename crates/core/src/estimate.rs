//! Pre-flight sizing of a bulk retrieval.
//!
//! Reads page 1 metadata from the upstream and forecasts page count and
//! duration. Never creates a job and never writes anything.

use std::sync::Arc;
use std::time::Duration;

use bulkpull_types::{DataSourceHandle, Estimate, SearchQuery};

use crate::error::{EstimateError, UpstreamError, ValidationError};
use crate::upstream::ProviderRegistry;
use crate::validate::validate_query;

/// Fixed per-page latency model used for the duration forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateModel {
    pub page_size: u32,
    pub per_page_latency: Duration,
    pub warning_threshold: u64,
    pub fetch_timeout: Duration,
}

impl Default for EstimateModel {
    fn default() -> Self {
        Self {
            page_size: 100,
            per_page_latency: Duration::from_millis(1200),
            warning_threshold: 10_000,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl EstimateModel {
    pub fn total_pages(&self, total_records: u64) -> u32 {
        let pages = total_records.div_ceil(u64::from(self.page_size.max(1)));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    pub fn forecast(&self, total_records: u64) -> Estimate {
        let total_pages = self.total_pages(total_records);
        let millis = u128::from(total_pages) * self.per_page_latency.as_millis();
        let estimated_duration = u64::try_from(millis.div_ceil(1000)).unwrap_or(u64::MAX);
        Estimate {
            total_records,
            total_pages,
            estimated_duration,
            exceeds_warning_threshold: total_records > self.warning_threshold,
        }
    }
}

#[derive(Clone)]
pub struct EstimateService {
    registry: Arc<ProviderRegistry>,
    model: EstimateModel,
}

impl EstimateService {
    pub fn new(registry: Arc<ProviderRegistry>, model: EstimateModel) -> Self {
        Self { registry, model }
    }

    pub fn model(&self) -> &EstimateModel {
        &self.model
    }

    pub async fn estimate(
        &self,
        query: &SearchQuery,
        source: &DataSourceHandle,
    ) -> Result<Estimate, EstimateError> {
        validate_query(query)?;
        let provider = self
            .registry
            .get(source)
            .ok_or_else(|| ValidationError::UnknownSource(source.to_string()))?;

        let page = tokio::time::timeout(
            self.model.fetch_timeout,
            provider.fetch_page(query, 1, self.model.page_size),
        )
        .await
        .map_err(|_| UpstreamError::Timeout(self.model.fetch_timeout))??;

        let total_records = query.cap_total(page.total_records);
        let estimate = self.model.forecast(total_records);
        tracing::debug!(
            source = %source,
            total_records,
            total_pages = estimate.total_pages,
            "estimate computed"
        );
        Ok(estimate)
    }
}
