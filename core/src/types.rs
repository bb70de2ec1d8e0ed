//! Shared primitive types used across the entire engine.

use chrono::{DateTime, TimeZone, Utc};

/// A stable, opaque identifier for any persisted entity.
pub type EntityId = String;

/// Loyalty points. Signed so ledger deltas share the type with balances.
pub type Points = i64;

/// Instant stored in the database as UTC epoch milliseconds.
pub type Millis = i64;

pub fn to_millis(at: DateTime<Utc>) -> Millis {
    at.timestamp_millis()
}

/// Out-of-range values clamp to the epoch rather than failing a row read.
pub fn from_millis(ms: Millis) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
}

pub const MILLIS_PER_MINUTE: Millis = 60_000;
pub const MILLIS_PER_HOUR: Millis = 60 * MILLIS_PER_MINUTE;
