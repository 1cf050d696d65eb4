//! Search query shape and data-source handles.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Query forwarded to the upstream search provider.
///
/// The provider treats it as opaque; bulkpull only validates its shape and
/// honours `max_records` as a cap on how many records a job retrieves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "number | null")]
    pub max_records: Option<u64>,
}

impl SearchQuery {
    pub fn terms(terms: impl Into<String>) -> Self {
        Self {
            terms: Some(terms.into()),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn with_max_records(mut self, max: u64) -> Self {
        self.max_records = Some(max);
        self
    }

    /// Apply the `max_records` cap to an upstream-reported total.
    pub fn cap_total(&self, reported: u64) -> u64 {
        match self.max_records {
            Some(max) => reported.min(max),
            None => reported,
        }
    }
}

/// Name of a configured upstream data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(transparent)]
pub struct DataSourceHandle(pub String);

impl DataSourceHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataSourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
