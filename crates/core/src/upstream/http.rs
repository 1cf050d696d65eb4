//! JSON-over-HTTP upstream provider.
//!
//! `POST {base_url}/search` with `{query, page, perPage}`; the response carries
//! `records` and `pagination.totalEntries` (or an `X-Total-Count` header).

use std::time::Duration;

use async_trait::async_trait;
use bulkpull_types::SearchQuery;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{SearchPage, SearchProvider, SourceRecord};
use crate::config::SourceConfig;
use crate::error::UpstreamError;

const TOTAL_COUNT_HEADER: &str = "x-total-count";
const MAX_ERROR_BODY: usize = 200;

pub struct HttpSearchProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody<'a> {
    query: &'a SearchQuery,
    page: u32,
    per_page: u32,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    records: Vec<Map<String, Value>>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    total_entries: u64,
}

impl HttpSearchProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            client,
        })
    }

    /// Build from a `[[sources]]` entry, reading the API key from the named env var.
    pub fn from_config(source: &SourceConfig) -> Result<Self, UpstreamError> {
        let api_key = source
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());
        if source.api_key_env.is_some() && api_key.is_none() {
            tracing::warn!(source = %source.name, "API key env var not set; sending unauthenticated requests");
        }
        Self::new(
            source.name.clone(),
            source.base_url.clone(),
            api_key,
            Duration::from_secs(source.timeout_secs),
        )
    }

    fn classify(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else if err.is_decode() {
            UpstreamError::Malformed(err.to_string())
        } else {
            UpstreamError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn fetch_page(
        &self,
        query: &SearchQuery,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, UpstreamError> {
        let url = format!("{}/search", self.base_url);
        let mut request = self.client.post(&url).json(&SearchBody {
            query,
            page,
            per_page,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            });
        }
        if status.is_server_error() {
            return Err(UpstreamError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let header_total = response
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body: SearchResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Malformed(e.to_string())
            }
        })?;

        let total_records = body
            .pagination
            .map(|p| p.total_entries)
            .or(header_total)
            .ok_or_else(|| UpstreamError::Malformed("response carries no total count".into()))?;

        let records = body
            .records
            .into_iter()
            .enumerate()
            .map(|(index, fields)| SourceRecord {
                id: fields
                    .get("id")
                    .and_then(record_id)
                    .unwrap_or_else(|| format!("p{page}-{index}")),
                fields,
            })
            .collect();

        Ok(SearchPage {
            records,
            total_records,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn record_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
