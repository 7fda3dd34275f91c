//! Read-time SLA classification.
//!
//! A session's level is derived from how long it has sat in its current
//! status, measured against `last_event_at` at query time. Nothing is
//! stored: a session crosses from OK to WARNING to BREACH simply by time
//! passing, with no event and no background job involved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Elapsed milliseconds above which a session is WARNING.
pub const WARNING_AFTER_MS: i64 = 3_600_000;

/// Elapsed milliseconds above which a session is BREACH.
pub const BREACH_AFTER_MS: i64 = 7_200_000;

/// Staleness level of a session, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaLevel {
    /// Within one hour of the last event.
    Ok,
    /// More than one hour since the last event.
    Warning,
    /// More than two hours since the last event.
    Breach,
}

/// Classifies an elapsed duration in milliseconds. Thresholds are strict:
/// exactly one hour is still [`SlaLevel::Ok`], exactly two hours is still
/// [`SlaLevel::Warning`]. Negative elapsed time (clock skew) is OK.
#[must_use]
pub const fn classify_ms(elapsed_ms: i64) -> SlaLevel {
    if elapsed_ms > BREACH_AFTER_MS {
        SlaLevel::Breach
    } else if elapsed_ms > WARNING_AFTER_MS {
        SlaLevel::Warning
    } else {
        SlaLevel::Ok
    }
}

/// Classifies a session by the time between its last event and `now`.
#[must_use]
pub fn classify(last_event_at: DateTime<Utc>, now: DateTime<Utc>) -> SlaLevel {
    classify_ms(now.signed_duration_since(last_event_at).num_milliseconds())
}
