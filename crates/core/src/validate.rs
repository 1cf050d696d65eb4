//! Shape checks run before any upstream call or job creation.

use bulkpull_types::SearchQuery;
use serde_json::Value;

use crate::error::ValidationError;

pub const MAX_TABLE_NAME_LEN: usize = 128;

pub fn validate_query(query: &SearchQuery) -> Result<(), ValidationError> {
    let has_terms = query
        .terms
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());
    if !has_terms && query.filters.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    for (key, value) in &query.filters {
        if key.trim().is_empty() {
            return Err(ValidationError::BlankFilterKey);
        }
        let ok = match value {
            Value::Array(items) => items.iter().all(is_scalar),
            other => is_scalar(other),
        };
        if !ok {
            return Err(ValidationError::InvalidFilter { key: key.clone() });
        }
    }

    if query.max_records == Some(0) {
        return Err(ValidationError::InvalidMaxRecords);
    }
    Ok(())
}

pub fn validate_table_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyTableName);
    }
    if trimmed.chars().count() > MAX_TABLE_NAME_LEN {
        return Err(ValidationError::TableNameTooLong {
            max: MAX_TABLE_NAME_LEN,
        });
    }
    Ok(())
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}
