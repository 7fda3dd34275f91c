//! Restart-safe polling consumer over a PSEE event source.
//!
//! The consumer owns the cursor lifecycle: on start it loads the persisted
//! cursor (a corrupt or unreadable cursor degrades to a full replay), then
//! polls the source once immediately and again every `poll_interval`. Each
//! tick fetches at most `batch_size` events after the cursor, hands them to
//! the [`BatchHandler`], and only after the handler succeeds persists the
//! cursor of the last event in the batch. The in-memory cursor advances
//! only after the persist succeeds, so a failed save re-delivers the batch
//! on the next tick.
//!
//! Delivery is therefore at-least-once: a crash or error between fold and
//! persist replays the batch. Handlers must tolerate re-delivery.
//!
//! Every per-tick failure (fetch, handle, persist) is logged at `warn` and
//! swallowed; the loop always survives to the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cursor_store::CursorStore;
use crate::event::{EventCursor, SessionEvent};
use crate::source::{BATCH_SIZE, EventSource, extract_cursor};

/// Default delay between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Default cursor-store key under which the consumer persists its position.
pub const DEFAULT_CURSOR_KEY: &str = "pseeview:consumer:cursor";

/// Tuning knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Maximum events fetched per tick.
    pub batch_size: usize,
    /// Cursor-store key for this consumer's position. Distinct consumers
    /// sharing one store must use distinct keys.
    pub cursor_key: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: BATCH_SIZE,
            cursor_key: DEFAULT_CURSOR_KEY.to_string(),
        }
    }
}

impl ConsumerConfig {
    /// Creates a config with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay between polls.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the maximum events fetched per tick.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the cursor-store key.
    #[must_use]
    pub fn with_cursor_key(mut self, cursor_key: impl Into<String>) -> Self {
        self.cursor_key = cursor_key.into();
        self
    }
}

/// Receives each fetched batch in stream order.
///
/// Implementations mutate through interior mutability; an `Err` aborts the
/// tick before the cursor moves, so the same batch is delivered again.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Handler-specific error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Processes one batch. Events arrive in `(created_at, id)` order.
    async fn handle_batch(&self, events: &[SessionEvent]) -> Result<(), Self::Error>;
}

/// Polling consumer that drives a [`BatchHandler`] from an [`EventSource`]
/// and checkpoints its position in a [`CursorStore`].
pub struct EventConsumer<S, C, H> {
    source: Arc<S>,
    cursor_store: Arc<C>,
    handler: Arc<H>,
    config: ConsumerConfig,
    /// Position of the last durably acknowledged event.
    cursor: Arc<RwLock<Option<EventCursor>>>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S, C, H> EventConsumer<S, C, H>
where
    S: EventSource + 'static,
    C: CursorStore + 'static,
    H: BatchHandler + 'static,
{
    /// Creates a stopped consumer.
    pub fn new(source: S, cursor_store: C, handler: H, config: ConsumerConfig) -> Self {
        Self {
            source: Arc::new(source),
            cursor_store: Arc::new(cursor_store),
            handler: Arc::new(handler),
            config,
            cursor: Arc::new(RwLock::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts the poll loop. Idempotent: a second call while the loop is
    /// running is ignored with a warning.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("event consumer already running; start ignored");
            return;
        }

        let initial = self.load_cursor().await;
        *self
            .cursor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = initial.clone();
        self.shutdown.store(false, Ordering::Relaxed);

        info!(
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis())
                .unwrap_or(u64::MAX),
            batch_size = self.config.batch_size,
            resume = initial.is_some(),
            "event consumer starting"
        );

        *task = Some(tokio::spawn(Self::run_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.cursor_store),
            Arc::clone(&self.handler),
            self.config.clone(),
            Arc::clone(&self.cursor),
            Arc::clone(&self.shutdown),
            Arc::clone(&self.wake),
        )));
    }

    /// Stops the poll loop and waits for it to exit. A tick in flight
    /// finishes first; a pending inter-poll sleep is cancelled. Idempotent:
    /// stopping a stopped consumer is a no-op.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            debug!("event consumer already stopped");
            return;
        };

        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_waiters();
        if let Err(error) = handle.await {
            warn!(error = %error, "event consumer task ended abnormally");
        }
        info!("event consumer stopped");
    }

    /// Returns `true` while the poll loop is alive.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Position of the last durably acknowledged event, if any.
    #[must_use]
    pub fn cursor(&self) -> Option<EventCursor> {
        self.cursor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Milliseconds between now and the acknowledged cursor's event time,
    /// or `None` before anything has been acknowledged.
    ///
    /// This measures the age of the consumed position, not queue depth: a
    /// quiet stream shows growing lag even when fully caught up.
    #[must_use]
    pub fn lag_ms(&self) -> Option<i64> {
        let cursor = self.cursor();
        cursor.map(|c| chrono::Utc::now().timestamp_millis() - c.created_at_ms)
    }

    async fn load_cursor(&self) -> Option<EventCursor> {
        let raw = match self.cursor_store.load(&self.config.cursor_key).await {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(error = %error, "cursor load failed; replaying from the beginning");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(cursor) => Some(cursor),
            Err(error) => {
                warn!(error = %error, "stored cursor is corrupt; replaying from the beginning");
                None
            }
        }
    }

    async fn run_loop(
        source: Arc<S>,
        cursor_store: Arc<C>,
        handler: Arc<H>,
        config: ConsumerConfig,
        cursor: Arc<RwLock<Option<EventCursor>>>,
        shutdown: Arc<AtomicBool>,
        wake: Arc<Notify>,
    ) {
        while !shutdown.load(Ordering::Relaxed) {
            Self::poll_once(&source, &cursor_store, &handler, &config, &cursor).await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            tokio::select! {
                () = wake.notified() => {}
                () = tokio::time::sleep(config.poll_interval) => {}
            }
        }
        debug!("event consumer loop exited");
    }

    /// One tick: fetch, handle, persist, advance. Any failure leaves the
    /// cursor where it was and defers to the next tick.
    async fn poll_once(
        source: &S,
        cursor_store: &C,
        handler: &H,
        config: &ConsumerConfig,
        cursor: &RwLock<Option<EventCursor>>,
    ) {
        let position = cursor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let events = match source.fetch_after(position.as_ref(), config.batch_size).await {
            Ok(events) => events,
            Err(error) => {
                warn!(error = %error, "event fetch failed; will retry next poll");
                return;
            }
        };
        if events.is_empty() {
            return;
        }
        let count = events.len();

        if let Err(error) = handler.handle_batch(&events).await {
            warn!(error = %error, count, "batch handler failed; batch will be re-delivered");
            return;
        }

        let Some(next) = extract_cursor(&events) else {
            return;
        };
        let raw = match serde_json::to_string(&next) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(error = %error, "cursor encode failed; batch will be re-delivered");
                return;
            }
        };
        if let Err(error) = cursor_store.save(&config.cursor_key, &raw).await {
            warn!(error = %error, "cursor save failed; batch will be re-delivered");
            return;
        }

        *cursor.write().unwrap_or_else(PoisonError::into_inner) = Some(next);
        debug!(count, "processed event batch");
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;

    use chrono::{TimeZone, Utc};
    use thiserror::Error;

    use super::*;
    use crate::cursor_store::MemoryCursorStore;
    use crate::event::EventPayload;
    use crate::read_model::SharedReadModel;
    use crate::source::MemoryEventSource;

    fn event(id: &str, session_id: &str, to_status: &str, at_ms: i64) -> SessionEvent {
        SessionEvent {
            id: id.to_string(),
            session_id: Some(session_id.to_string()),
            event_type: "StatusChanged".to_string(),
            payload: EventPayload::status(to_status),
            created_at: Utc.timestamp_millis_opt(at_ms).unwrap(),
        }
    }

    /// Short-interval config so paused-clock tests tick fast.
    fn test_config() -> ConsumerConfig {
        ConsumerConfig::new().with_poll_interval(Duration::from_millis(10))
    }

    /// Lets the loop run a few ticks under the paused clock.
    async fn run_ticks(n: u32) {
        tokio::time::sleep(Duration::from_millis(u64::from(n) * 10 + 5)).await;
    }

    #[derive(Debug, Error)]
    #[error("handler exploded")]
    struct HandlerExploded;

    /// Fails the first `fail_remaining` batches, then folds normally.
    struct FlakyHandler {
        fail_remaining: AtomicUsize,
        inner: SharedReadModel,
    }

    #[async_trait]
    impl BatchHandler for FlakyHandler {
        type Error = HandlerExploded;

        async fn handle_batch(&self, events: &[SessionEvent]) -> Result<(), Self::Error> {
            let remaining = self.fail_remaining.load(Ordering::Relaxed);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::Relaxed);
                return Err(HandlerExploded);
            }
            self.inner.handle_batch(events).await.unwrap();
            Ok(())
        }
    }

    #[derive(Debug, Error)]
    #[error("source unavailable")]
    struct SourceUnavailable;

    /// Fails the first `fail_remaining` fetches, then serves the inner log.
    struct FlakySource {
        fail_remaining: AtomicUsize,
        inner: MemoryEventSource,
    }

    #[async_trait]
    impl EventSource for FlakySource {
        type Error = SourceUnavailable;

        async fn fetch_after(
            &self,
            cursor: Option<&EventCursor>,
            limit: usize,
        ) -> Result<Vec<SessionEvent>, Self::Error> {
            let remaining = self.fail_remaining.load(Ordering::Relaxed);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::Relaxed);
                return Err(SourceUnavailable);
            }
            Ok(self.inner.fetch_after(cursor, limit).await.unwrap())
        }
    }

    #[derive(Debug, Error)]
    #[error("store down")]
    struct StoreDown;

    /// Delegates to a [`MemoryCursorStore`] but fails saves on demand.
    #[derive(Clone)]
    struct FailingSaveStore {
        inner: MemoryCursorStore,
        fail_saves: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CursorStore for FailingSaveStore {
        type Error = StoreDown;

        async fn load(&self, key: &str) -> Result<Option<String>, Self::Error> {
            Ok(self.inner.load(key).await.unwrap())
        }

        async fn save(&self, key: &str, value: &str) -> Result<(), Self::Error> {
            if self.fail_saves.load(Ordering::Relaxed) {
                return Err(StoreDown);
            }
            self.inner.save(key, value).await.unwrap();
            Ok(())
        }
    }

    #[test]
    fn config_defaults_match_the_documented_contract() {
        let config = ConsumerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(5000));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.cursor_key, "pseeview:consumer:cursor");

        let tuned = ConsumerConfig::new()
            .with_poll_interval(Duration::from_secs(1))
            .with_batch_size(25)
            .with_cursor_key("other");
        assert_eq!(tuned.poll_interval, Duration::from_secs(1));
        assert_eq!(tuned.batch_size, 25);
        assert_eq!(tuned.cursor_key, "other");
    }

    #[tokio::test(start_paused = true)]
    async fn processes_existing_events_and_persists_the_cursor() {
        let source = MemoryEventSource::new();
        source.push(event("evt-1", "s1", "A", 100));
        source.push(event("evt-2", "s2", "X", 200));
        source.push(event("evt-3", "s1", "B", 300));
        let store = MemoryCursorStore::new();
        let model = SharedReadModel::new();
        let consumer =
            EventConsumer::new(source, store.clone(), model.clone(), test_config());

        consumer.start().await;
        run_ticks(2).await;
        consumer.stop().await;

        assert_eq!(model.stats().await.total_events_processed, 3);
        assert_eq!(model.get("s1").await.unwrap().current_status, "B");
        assert_eq!(model.get("s2").await.unwrap().current_status, "X");

        let expected = EventCursor::new(300, "evt-3");
        assert_eq!(consumer.cursor(), Some(expected.clone()));
        let raw = store.get("pseeview:consumer:cursor").unwrap();
        let persisted: EventCursor = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn picks_up_events_appended_while_running() {
        let source = MemoryEventSource::new();
        let model = SharedReadModel::new();
        let consumer = EventConsumer::new(
            source.clone(),
            MemoryCursorStore::new(),
            model.clone(),
            test_config(),
        );

        consumer.start().await;
        run_ticks(1).await;
        assert_eq!(model.stats().await.total_events_processed, 0);

        source.push(event("evt-1", "s1", "A", 100));
        source.push(event("evt-2", "s1", "B", 200));
        run_ticks(2).await;
        consumer.stop().await;

        assert_eq!(model.stats().await.total_events_processed, 2);
        assert_eq!(model.get("s1").await.unwrap().status_history, vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_from_the_persisted_cursor_after_restart() {
        let source = MemoryEventSource::new();
        source.push(event("evt-1", "s1", "A", 100));
        source.push(event("evt-2", "s1", "B", 200));
        let store = MemoryCursorStore::new();

        let first_model = SharedReadModel::new();
        let first = EventConsumer::new(
            source.clone(),
            store.clone(),
            first_model.clone(),
            test_config(),
        );
        first.start().await;
        run_ticks(2).await;
        first.stop().await;
        assert_eq!(first_model.stats().await.total_events_processed, 2);

        // A new event arrives while nothing is consuming.
        source.push(event("evt-3", "s1", "C", 300));

        // A fresh consumer over the same store must see only the new event.
        let second_model = SharedReadModel::new();
        let second =
            EventConsumer::new(source, store, second_model.clone(), test_config());
        second.start().await;
        run_ticks(2).await;
        second.stop().await;

        assert_eq!(second_model.stats().await.total_events_processed, 1);
        assert_eq!(second_model.get("s1").await.unwrap().status_history, vec!["C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_cursor_replays_from_the_beginning() {
        let source = MemoryEventSource::new();
        source.push(event("evt-1", "s1", "A", 100));
        source.push(event("evt-2", "s1", "B", 200));
        let store = MemoryCursorStore::new();
        store
            .save("pseeview:consumer:cursor", "{not json at all")
            .await
            .unwrap();

        let model = SharedReadModel::new();
        let consumer = EventConsumer::new(source, store.clone(), model.clone(), test_config());
        consumer.start().await;
        run_ticks(2).await;
        consumer.stop().await;

        assert_eq!(model.stats().await.total_events_processed, 2);

        // The corrupt value has been replaced by a valid cursor.
        let raw = store.get("pseeview:consumer:cursor").unwrap();
        let persisted: EventCursor = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, EventCursor::new(200, "evt-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn handler_failure_redelivers_the_batch_until_it_succeeds() {
        let source = MemoryEventSource::new();
        source.push(event("evt-1", "s1", "A", 100));
        let model = SharedReadModel::new();
        let handler = FlakyHandler {
            fail_remaining: AtomicUsize::new(2),
            inner: model.clone(),
        };
        let consumer = EventConsumer::new(
            source,
            MemoryCursorStore::new(),
            handler,
            test_config(),
        );

        consumer.start().await;
        run_ticks(4).await;
        consumer.stop().await;

        // Two failed deliveries never moved the cursor; the third folded
        // the batch exactly once.
        assert_eq!(model.stats().await.total_events_processed, 1);
        assert_eq!(consumer.cursor(), Some(EventCursor::new(100, "evt-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_is_retried_on_the_next_tick() {
        let log = MemoryEventSource::new();
        log.push(event("evt-1", "s1", "A", 100));
        let source = FlakySource {
            fail_remaining: AtomicUsize::new(2),
            inner: log,
        };
        let store = MemoryCursorStore::new();
        let model = SharedReadModel::new();
        let consumer = EventConsumer::new(source, store.clone(), model.clone(), test_config());

        consumer.start().await;
        run_ticks(4).await;
        consumer.stop().await;

        // Two unreachable-source ticks left no trace; the third delivered.
        assert_eq!(model.stats().await.total_events_processed, 1);
        assert_eq!(consumer.cursor(), Some(EventCursor::new(100, "evt-1")));
        assert!(store.get("pseeview:consumer:cursor").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn save_failure_redelivers_and_recovers() {
        let source = MemoryEventSource::new();
        source.push(event("evt-1", "s1", "A", 100));
        let fail_saves = Arc::new(AtomicBool::new(true));
        let store = FailingSaveStore {
            inner: MemoryCursorStore::new(),
            fail_saves: Arc::clone(&fail_saves),
        };
        let model = SharedReadModel::new();
        let consumer = EventConsumer::new(source, store.clone(), model.clone(), test_config());

        consumer.start().await;
        run_ticks(3).await;

        // Every tick refetched and refolded the batch: at-least-once.
        let refolds = model.stats().await.total_events_processed;
        assert!(refolds > 1, "expected re-delivery, saw {refolds} folds");
        assert_eq!(consumer.cursor(), None);

        fail_saves.store(false, Ordering::Relaxed);
        run_ticks(2).await;
        consumer.stop().await;

        assert_eq!(consumer.cursor(), Some(EventCursor::new(100, "evt-1")));
        let raw = store.inner.get("pseeview:consumer:cursor").unwrap();
        assert_eq!(
            serde_json::from_str::<EventCursor>(&raw).unwrap(),
            EventCursor::new(100, "evt-1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_ignored() {
        let source = MemoryEventSource::new();
        source.push(event("evt-1", "s1", "A", 100));
        let model = SharedReadModel::new();
        let consumer = EventConsumer::new(
            source,
            MemoryCursorStore::new(),
            model.clone(),
            test_config(),
        );

        consumer.start().await;
        consumer.start().await;
        run_ticks(2).await;
        assert!(consumer.is_running().await);

        // A single stop ends the single underlying task.
        consumer.stop().await;
        assert!(!consumer.is_running().await);
        assert_eq!(model.stats().await.total_events_processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_even_before_start() {
        let consumer = EventConsumer::new(
            MemoryEventSource::new(),
            MemoryCursorStore::new(),
            SharedReadModel::new(),
            test_config(),
        );

        consumer.stop().await;
        assert!(!consumer.is_running().await);

        consumer.start().await;
        consumer.stop().await;
        consumer.stop().await;
        assert!(!consumer.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_pending_sleep() {
        let consumer = EventConsumer::new(
            MemoryEventSource::new(),
            MemoryCursorStore::new(),
            SharedReadModel::new(),
            ConsumerConfig::new().with_poll_interval(Duration::from_secs(3600)),
        );

        consumer.start().await;
        tokio::task::yield_now().await;

        let before = tokio::time::Instant::now();
        consumer.stop().await;
        // Under the paused clock an un-cancelled sleep would have advanced
        // time by the full hour before the join completed.
        assert!(before.elapsed() < Duration::from_secs(3600));
        assert!(!consumer.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_on_the_same_instance_picks_up_where_it_left_off() {
        let source = MemoryEventSource::new();
        source.push(event("evt-1", "s1", "A", 100));
        let model = SharedReadModel::new();
        let consumer = EventConsumer::new(
            source.clone(),
            MemoryCursorStore::new(),
            model.clone(),
            test_config(),
        );

        consumer.start().await;
        run_ticks(2).await;
        consumer.stop().await;
        assert_eq!(model.stats().await.total_events_processed, 1);

        source.push(event("evt-2", "s1", "B", 200));
        consumer.start().await;
        run_ticks(2).await;
        consumer.stop().await;

        assert_eq!(model.stats().await.total_events_processed, 2);
        assert_eq!(model.get("s1").await.unwrap().status_history, vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn lag_tracks_the_acknowledged_cursor_age() {
        let source = MemoryEventSource::new();
        let now_ms = Utc::now().timestamp_millis();
        source.push(event("evt-1", "s1", "A", now_ms - 5000));
        let consumer = EventConsumer::new(
            source,
            MemoryCursorStore::new(),
            SharedReadModel::new(),
            test_config(),
        );

        assert_eq!(consumer.lag_ms(), None);

        consumer.start().await;
        run_ticks(2).await;
        consumer.stop().await;

        let lag = consumer.lag_ms().unwrap();
        assert!(lag >= 5000, "lag {lag} should cover the event age");
        assert!(lag < 60_000, "lag {lag} unexpectedly large");
    }

    #[tokio::test(start_paused = true)]
    async fn respects_batch_size_per_tick_but_drains_everything() {
        let source = MemoryEventSource::new();
        for i in 0..7 {
            source.push(event(&format!("evt-{i}"), "s1", "A", 100 + i));
        }
        let model = SharedReadModel::new();
        let consumer = EventConsumer::new(
            source,
            MemoryCursorStore::new(),
            model.clone(),
            test_config().with_batch_size(3),
        );

        consumer.start().await;
        run_ticks(5).await;
        consumer.stop().await;

        // 7 events over batches of 3 need three ticks; all arrive exactly once.
        assert_eq!(model.stats().await.total_events_processed, 7);
        assert_eq!(model.get("s1").await.unwrap().event_count, 7);
    }
}
