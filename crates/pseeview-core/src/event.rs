//! Event and cursor types shared by the reader, consumer, and read model.
//!
//! Events are owned by the external PSEE log and are immutable here. The
//! composite cursor orders the stream by `(created_at_ms, event_id)` so that
//! events sharing a timestamp are neither skipped nor reprocessed forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resumption point in the event stream: the position of the last
/// successfully folded event.
///
/// Ordering is the composite `(created_at_ms, event_id)` tuple comparison
/// (derived `Ord` follows field order). Comparing the timestamp alone would
/// skip events that collide on `created_at_ms`; comparing the fields
/// independently would refetch one event forever.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventCursor {
    /// Event timestamp in milliseconds since the Unix epoch.
    pub created_at_ms: i64,
    /// Event identifier tie-breaker within a timestamp.
    pub event_id: String,
}

impl EventCursor {
    /// Creates a cursor from its two components.
    #[must_use]
    pub fn new(created_at_ms: i64, event_id: impl Into<String>) -> Self {
        Self {
            created_at_ms,
            event_id: event_id.into(),
        }
    }
}

/// Semi-structured event payload.
///
/// The PSEE writers attach an open map; the fold only interprets the fields
/// below and carries everything else through untouched in `extra`. Every
/// interpreted field is optional and may be absent on any event type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Target status of a status-transition event.
    #[serde(rename = "toStatus", default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<String>,

    /// Human-readable reason, attached to rejection events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// User the session is currently assigned to.
    #[serde(
        rename = "assignedUser",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_user: Option<String>,

    /// Unrecognized payload fields, passed through opaquely.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventPayload {
    /// Creates a payload carrying only a status transition.
    #[must_use]
    pub fn status(to_status: impl Into<String>) -> Self {
        Self {
            to_status: Some(to_status.into()),
            ..Self::default()
        }
    }
}

/// A single immutable row from the PSEE event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Opaque identifier, unique within the log.
    pub id: String,
    /// Production session this event belongs to. Events without a session
    /// are counted but never folded into session metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Event type discriminant, e.g. `StageRejected`.
    pub event_type: String,
    /// Semi-structured payload.
    #[serde(default)]
    pub payload: EventPayload,
    /// Emission timestamp; ordering key together with `id`.
    pub created_at: DateTime<Utc>,
}

impl SessionEvent {
    /// Returns this event's position in the stream.
    #[must_use]
    pub fn cursor(&self) -> EventCursor {
        EventCursor {
            created_at_ms: self.created_at.timestamp_millis(),
            event_id: self.id.clone(),
        }
    }
}
