//! Storage operations for chorus-api
//!
//! Free async functions over a `SqlitePool` (or any SQLite executor where
//! a call must join a transaction). Counter updates are single
//! `x = x + 1` statements and status changes are conditional updates.

pub mod contributions;
pub mod problems;
pub mod profiles;
pub mod syntheses;

use chorus_common::{Error, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Bad {} '{}': {}", column, value, e)))
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad {} '{}': {}", column, value, e)))
}
