// db/time.rs - Timestamp storage format and tolerant decoding
//
// Timestamps are stored as UTC text in a fixed-width shape SQLite's datetime
// functions understand, so lexicographic comparison matches chronological
// order (MAX(updated_at), ORDER BY updated_at). Reads must tolerate every
// shape the driver can hand back depending on column affinity: RFC3339 with
// or without sub-seconds, and the space-separated datetime() shape with or
// without a timezone suffix.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{Error, Result};

/// Storage shape: `2024-03-01 12:34:56.789`, always UTC.
const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Naive shapes accepted on read, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Zoned shapes accepted on read.
const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%d %H:%M:%S%.f%:z"];

/// Format a timestamp for storage.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(STORAGE_FORMAT).to_string()
}

/// Parse a stored timestamp, tolerating the formats above.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ZONED_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Ok(ts.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(Error::Serialization(format!(
        "unrecognized timestamp: {text:?}"
    )))
}

/// Parse an optional stored timestamp.
pub fn parse_optional(text: Option<String>) -> Result<Option<DateTime<Utc>>> {
    match text {
        Some(text) if !text.is_empty() => Ok(Some(parse_timestamp(&text)?)),
        _ => Ok(None),
    }
}

/// Format an optional timestamp for storage.
pub fn format_optional(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(format_timestamp)
}
