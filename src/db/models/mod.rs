// src/db/models/mod.rs

//! Data models for catalog entities
//!
//! Each struct maps onto one table (or, for the latest-version aggregate, a
//! header table plus a per-platform table) and carries its own insert, find
//! and delete methods.

mod latest;
mod package;
mod update;
mod version;

pub use latest::{LatestVersionAggregate, PlatformEntry};
pub use package::Package;
pub use update::UpdateBinary;
pub use version::{PackageFile, Version};

use chrono::{SecondsFormat, Utc};

/// Current time as an RFC 3339 UTC timestamp, the format used in every table
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Convert a text column into a typed value, surfacing parse failures as
/// rusqlite conversion errors
pub(crate) fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

/// Decode a JSON string-list column
pub(crate) fn json_list(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Encode a string list for storage in a JSON column
pub(crate) fn to_json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}
