pub mod blob;
pub mod file;
pub mod share;

pub use blob::*;
pub use file::*;
pub use share::*;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};

/// Format a timestamp the way every table stores it.
///
/// Fixed-width UTC with microseconds, so stored values order correctly as
/// plain strings inside SQL predicates.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Whether `at` keeps the fixed-width form; years past 9999 gain a sign
pub fn is_storable(at: DateTime<Utc>) -> bool {
    (0..=9999).contains(&at.year())
}

/// Current time in storage format
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse a stored timestamp
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Identity of the caller making an owner-scoped request
#[derive(Debug, Clone)]
pub struct CurrentOwner {
    pub id: String,
}
