//! Shared encode/decode helpers for the sqlite store.
//!
//! Keeps the query code in `sqlite.rs` lean: pure serialization glue only,
//! no I/O.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::StoreError;

/// Fixed-width RFC3339 UTC form; lexicographic order equals chronological
/// order, which the claim predicate compares in SQL.
pub(super) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn fmt_ts_opt(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(fmt_ts)
}

pub(super) fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::backend(format!("bad timestamp {s:?}: {e}")))
}

pub(super) fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.as_deref().map(parse_ts).transpose()
}

pub(super) fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(StoreError::Serde)
}

pub(super) fn from_json<T: DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_str(s).map_err(StoreError::Serde)
}

pub(super) fn from_json_opt<T: DeserializeOwned>(
    s: Option<String>,
) -> Result<Option<T>, StoreError> {
    s.as_deref().map(from_json).transpose()
}
