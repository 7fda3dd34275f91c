//! Assembled read-model pipeline.
//!
//! [`SessionPipeline`] wires an event source, a cursor store, and a shared
//! read model into one object with an explicit lifecycle: `initialize`
//! starts consuming, `shutdown` stops the poller and discards the derived
//! state, and the query methods serve dashboard-ready shapes at any point
//! in between. Before `initialize` and after `shutdown` every query
//! answers from the empty model rather than failing.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::consumer::{ConsumerConfig, EventConsumer};
use crate::cursor_store::CursorStore;
use crate::dto::{SessionSummary, SessionsResponse};
use crate::read_model::{SharedReadModel, SlaAlert};
use crate::source::EventSource;

/// Default number of alerts returned by [`SessionPipeline::alerts`]
/// callers that do not specify a limit.
pub const DEFAULT_ALERT_LIMIT: usize = 50;

/// Operational counters for the pipeline as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    /// Sessions currently tracked.
    pub session_count: usize,
    /// Events folded since the model was last cleared.
    pub total_events_processed: u64,
    /// Alerts accumulated.
    pub alert_count: usize,
    /// Age of the acknowledged cursor in milliseconds, absent until the
    /// first batch has been acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lag_ms: Option<i64>,
    /// Whether the poll loop is alive.
    pub running: bool,
}

/// Event pipeline plus its query surface.
pub struct SessionPipeline<S, C> {
    consumer: EventConsumer<S, C, SharedReadModel>,
    read_model: SharedReadModel,
}

impl<S, C> SessionPipeline<S, C>
where
    S: EventSource + 'static,
    C: CursorStore + 'static,
{
    /// Builds a pipeline around an empty read model. Nothing is consumed
    /// until [`initialize`](Self::initialize).
    #[must_use]
    pub fn new(source: S, cursor_store: C, config: ConsumerConfig) -> Self {
        let read_model = SharedReadModel::new();
        let consumer = EventConsumer::new(source, cursor_store, read_model.clone(), config);
        Self {
            consumer,
            read_model,
        }
    }

    /// Starts consuming from the persisted cursor. Idempotent.
    pub async fn initialize(&self) {
        self.consumer.start().await;
    }

    /// Stops the consumer, letting a tick in flight finish, then discards
    /// the derived state. The model is rebuilt by replay on the next
    /// process start, so nothing is lost. Idempotent.
    pub async fn shutdown(&self) {
        self.consumer.stop().await;
        self.read_model.clear().await;
    }

    /// Lists all tracked sessions as of now.
    pub async fn sessions(&self) -> SessionsResponse {
        SessionsResponse::from_sessions(self.read_model.all_sessions().await, Utc::now())
    }

    /// Looks up one session as of now.
    pub async fn session(&self, session_id: &str) -> Option<SessionSummary> {
        self.read_model
            .get(session_id)
            .await
            .map(|metrics| SessionSummary::from_metrics(&metrics, Utc::now()))
    }

    /// Returns the most recent `limit` alerts in insertion order.
    pub async fn alerts(&self, limit: usize) -> Vec<SlaAlert> {
        self.read_model.alerts(limit).await
    }

    /// Returns pipeline-wide counters.
    pub async fn stats(&self) -> PipelineStats {
        let model = self.read_model.stats().await;
        PipelineStats {
            session_count: model.session_count,
            total_events_processed: model.total_events_processed,
            alert_count: model.alert_count,
            lag_ms: self.consumer.lag_ms(),
            running: self.consumer.is_running().await,
        }
    }

    /// Shared handle to the underlying read model.
    #[must_use]
    pub fn read_model(&self) -> &SharedReadModel {
        &self.read_model
    }

    /// The underlying consumer, for cursor inspection.
    #[must_use]
    pub fn consumer(&self) -> &EventConsumer<S, C, SharedReadModel> {
        &self.consumer
    }
}
