//! Wire-format shapes for the query surface.
//!
//! Field names follow the camelCase convention of the PSEE tooling, so the
//! JSON here can be consumed by the existing dashboards unchanged. All
//! time-dependent fields (`timeInStatusSec`, `slaLevel`) are computed at
//! mapping time from the caller-supplied `now`, never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::read_model::SessionMetrics;
use crate::sla::{self, SlaLevel};

/// Role responsible for moving a session out of its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Owns shooting stages.
    Photographer,
    /// Owns retouching stages.
    Retouch,
    /// Owns review and sales stages.
    Sales,
    /// No role owns the status (including the pre-first-event sentinel).
    Unassigned,
}

impl Role {
    /// Maps a session status to the role that owns it. Unrecognized
    /// statuses fall back to [`Role::Unassigned`] rather than failing, so
    /// new upstream statuses degrade gracefully.
    #[must_use]
    pub fn for_status(status: &str) -> Self {
        match status {
            "PENDING_PHOTOGRAPHER" | "SHOOTING" => Self::Photographer,
            "PENDING_RETOUCH" | "RETOUCHING" => Self::Retouch,
            "PENDING_REVIEW" | "PENDING_SALES" => Self::Sales,
            _ => Self::Unassigned,
        }
    }
}

/// One session as presented to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session identifier.
    pub id: String,
    /// Current status, or the `UNKNOWN` sentinel.
    pub status: String,
    /// Role responsible for the current status.
    pub role: Role,
    /// Last-seen assignee, omitted when none was ever recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_user: Option<String>,
    /// Whole seconds since the last event, clamped to zero under clock
    /// skew.
    pub time_in_status_sec: i64,
    /// Staleness classification at mapping time.
    pub sla_level: SlaLevel,
    /// First-seen timestamp.
    pub created_at: DateTime<Utc>,
    /// Last event timestamp.
    pub last_event_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Builds the presentation row for one session as of `now`.
    #[must_use]
    pub fn from_metrics(metrics: &SessionMetrics, now: DateTime<Utc>) -> Self {
        let elapsed = now.signed_duration_since(metrics.last_event_at);
        Self {
            id: metrics.session_id.clone(),
            status: metrics.current_status.clone(),
            role: Role::for_status(&metrics.current_status),
            assigned_user: metrics.assigned_user.clone(),
            time_in_status_sec: elapsed.num_seconds().max(0),
            sla_level: sla::classify_ms(elapsed.num_milliseconds()),
            created_at: metrics.created_at,
            last_event_at: metrics.last_event_at,
        }
    }
}

/// Envelope for the session listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsResponse {
    /// Sessions ordered by `(createdAt, id)`.
    pub data: Vec<SessionSummary>,
    /// Number of sessions in `data`.
    pub total: usize,
}

impl SessionsResponse {
    /// Builds the listing as of `now`. Snapshot order from the read model
    /// is arbitrary, so rows are sorted here to keep the listing stable
    /// across polls.
    #[must_use]
    pub fn from_sessions(mut sessions: Vec<SessionMetrics>, now: DateTime<Utc>) -> Self {
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        let data: Vec<SessionSummary> = sessions
            .iter()
            .map(|metrics| SessionSummary::from_metrics(metrics, now))
            .collect();
        let total = data.len();
        Self { data, total }
    }
}
