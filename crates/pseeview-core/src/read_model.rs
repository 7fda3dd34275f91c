//! In-memory read model of production sessions.
//!
//! The model is a deterministic fold over the PSEE event stream: given the
//! same events from the beginning, the resulting state is identical
//! regardless of how the stream was split into batches. The log is the
//! truth; the model is never authoritative and can be discarded and rebuilt
//! by replaying at any time.
//!
//! # Delivery caveat
//!
//! Delivery is at-least-once. If the process crashes after folding a batch
//! but before the cursor is persisted, that batch is folded again on
//! restart: `event_count` double-counts and history/alert entries for the
//! batch are duplicated. There is no per-event deduplication; callers must
//! not assume exact counts across consumer restarts mid-batch.
//!
//! # Growth
//!
//! Sessions and alerts grow without bound; there is no eviction. The read
//! path exposes only the most recent N alerts, but the underlying list
//! keeps everything until [`SessionReadModel::clear`].

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::consumer::BatchHandler;
use crate::event::SessionEvent;

/// Status assigned to a session before its first status-bearing event.
pub const UNKNOWN_STATUS: &str = "UNKNOWN";

/// Event type that triggers an SLA alert.
pub const STAGE_REJECTED: &str = "StageRejected";

/// Derived per-session metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Session identifier (unique key).
    pub session_id: String,
    /// Last-seen `toStatus`, or [`UNKNOWN_STATUS`] until one arrives.
    pub current_status: String,
    /// Last-seen assigned user, if any event carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_user: Option<String>,
    /// Timestamp of the first event folded for this session. Fold-time:
    /// when the cursor starts mid-stream this is not the true creation
    /// time.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recently folded event.
    pub last_event_at: DateTime<Utc>,
    /// Number of events folded for this session.
    pub event_count: u64,
    /// Status values in fold order; records status-bearing events only.
    pub status_history: Vec<String>,
}

/// Alert severity scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// Informational only.
    Info,
    /// Needs attention; the stage-rejection rule emits this.
    Warning,
    /// Requires immediate action.
    Critical,
}

/// Threshold-rule alert derived from a single event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaAlert {
    /// Session the alert belongs to.
    pub session_id: String,
    /// Event type that triggered the rule.
    pub event_type: String,
    /// Alert severity.
    pub severity: AlertSeverity,
    /// Human-readable description.
    pub message: String,
    /// Timestamp of the triggering event (not of fold time).
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counters over the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadModelStats {
    /// Number of sessions currently tracked.
    pub session_count: usize,
    /// Events folded since the last [`SessionReadModel::clear`], including
    /// events without a session.
    pub total_events_processed: u64,
    /// Alerts accumulated since the last clear.
    pub alert_count: usize,
}

/// Materialized view folded from the event stream.
#[derive(Debug, Default)]
pub struct SessionReadModel {
    sessions: HashMap<String, SessionMetrics>,
    alerts: Vec<SlaAlert>,
    total_events_processed: u64,
}

impl SessionReadModel {
    /// Creates an empty read model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the model.
    ///
    /// Every event counts toward `total_events_processed`; events without
    /// a session contribute nothing else.
    pub fn apply_event(&mut self, event: &SessionEvent) {
        self.total_events_processed += 1;

        let Some(session_id) = event.session_id.as_deref() else {
            return;
        };

        let metrics = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionMetrics {
                session_id: session_id.to_string(),
                current_status: UNKNOWN_STATUS.to_string(),
                assigned_user: None,
                created_at: event.created_at,
                last_event_at: event.created_at,
                event_count: 0,
                status_history: Vec::new(),
            });

        metrics.event_count += 1;
        metrics.last_event_at = event.created_at;

        if let Some(to_status) = &event.payload.to_status {
            metrics.current_status.clone_from(to_status);
            metrics.status_history.push(to_status.clone());
        }

        if let Some(assigned_user) = &event.payload.assigned_user {
            metrics.assigned_user = Some(assigned_user.clone());
        }

        if event.event_type == STAGE_REJECTED {
            let reason = event.payload.reason.as_deref().unwrap_or("unknown");
            let alert = SlaAlert {
                session_id: session_id.to_string(),
                event_type: event.event_type.clone(),
                severity: AlertSeverity::Warning,
                message: format!("session {session_id} stage rejected: {reason}"),
                timestamp: event.created_at,
            };
            debug!(
                session_id = %alert.session_id,
                reason = %reason,
                "recorded stage rejection alert"
            );
            self.alerts.push(alert);
        }
    }

    /// Folds a batch in the order received. Order matters: the status
    /// history must reflect true event order.
    pub fn apply_batch(&mut self, events: &[SessionEvent]) {
        for event in events {
            self.apply_event(event);
        }
    }

    /// Returns the metrics for a session, if tracked.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&SessionMetrics> {
        self.sessions.get(session_id)
    }

    /// Returns an unordered snapshot of all tracked sessions.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<SessionMetrics> {
        self.sessions.values().cloned().collect()
    }

    /// Returns the most recent `limit` alerts in insertion order.
    #[must_use]
    pub fn alerts(&self, limit: usize) -> Vec<SlaAlert> {
        let start = self.alerts.len().saturating_sub(limit);
        self.alerts[start..].to_vec()
    }

    /// Returns aggregate counters.
    #[must_use]
    pub fn stats(&self) -> ReadModelStats {
        ReadModelStats {
            session_count: self.sessions.len(),
            total_events_processed: self.total_events_processed,
            alert_count: self.alerts.len(),
        }
    }

    /// Returns the number of tracked sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Discards all derived state, for rebuild-from-scratch.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.alerts.clear();
        self.total_events_processed = 0;
    }
}

/// Clonable handle to a read model shared between the single poll-loop
/// writer and any number of query-side readers.
///
/// The poll task folds through [`BatchHandler`]; everything else only
/// reads snapshots.
#[derive(Clone, Default)]
pub struct SharedReadModel {
    inner: Arc<RwLock<SessionReadModel>>,
}

impl SharedReadModel {
    /// Creates a handle around an empty read model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cloned snapshot of one session's metrics.
    pub async fn get(&self, session_id: &str) -> Option<SessionMetrics> {
        self.inner.read().await.get(session_id).cloned()
    }

    /// Returns an unordered snapshot of all sessions.
    pub async fn all_sessions(&self) -> Vec<SessionMetrics> {
        self.inner.read().await.all_sessions()
    }

    /// Returns the most recent `limit` alerts in insertion order.
    pub async fn alerts(&self, limit: usize) -> Vec<SlaAlert> {
        self.inner.read().await.alerts(limit)
    }

    /// Returns aggregate counters.
    pub async fn stats(&self) -> ReadModelStats {
        self.inner.read().await.stats()
    }

    /// Discards all derived state.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[async_trait]
impl BatchHandler for SharedReadModel {
    type Error = Infallible;

    async fn handle_batch(&self, events: &[SessionEvent]) -> Result<(), Self::Error> {
        self.inner.write().await.apply_batch(events);
        Ok(())
    }
}
