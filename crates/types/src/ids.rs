//! Identifier normalization.
//!
//! Ids cross two transports (JSON over HTTP and over the push socket) and
//! some producers encode them as numbers. Everything is compared as a
//! trimmed string.

use serde::{Deserialize, Deserializer};

/// Canonical string form of an id: surrounding whitespace and quotes removed.
pub fn normalize_id(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_string()
}

/// Compare two ids after normalization.
pub fn ids_match(a: &str, b: &str) -> bool {
    normalize_id(a) == normalize_id(b)
}

/// Deserialize an id that may arrive as a string or as a number.
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => normalize_id(&s),
        RawId::Unsigned(n) => n.to_string(),
        RawId::Signed(n) => n.to_string(),
    })
}
