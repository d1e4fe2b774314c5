//! Build metadata recorded alongside every saved index.

use crate::hnsw::Space;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Written once per build, read back on load to reconstruct a compatible graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub n_elements: usize,
    pub dim: usize,
    pub space: Space,
    #[serde(with = "iso8601")]
    pub built_at: DateTime<Utc>,
    pub ef_construction: usize,
    #[serde(rename = "M")]
    pub m: usize,
}

/// ISO-8601 timestamps. Written as RFC 3339 UTC; reading also accepts a naive
/// `YYYY-MM-DDTHH:MM:SS[.frac]` stamp, taken as UTC.
mod iso8601 {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| de::Error::custom(format!("invalid built_at '{raw}': {e}")))
    }
}
