//! Caller identity for control-plane routes.
//!
//! Authentication happens upstream of this service; requests arrive with the
//! already-authenticated owner id in `x-user-id`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use bulkpull_types::normalize_id;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Normalized owner id of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let id = normalize_id(raw);
        if id.is_empty() {
            return Err(ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")));
        }
        Ok(OwnerId(id))
    }
}
