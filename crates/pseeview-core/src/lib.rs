//! pseeview-core - Production Session Event read-model pipeline
//!
//! This library consumes the append-only Production Session Event (PSEE)
//! log and folds it into an in-memory read model of photo production
//! sessions. The log is the source of truth; the model is derived,
//! disposable, and rebuilt by replaying from the beginning. Consumption is
//! cursor-based and restart-safe: the composite `(created_at, id)` cursor
//! is persisted only after a batch has been fully folded, giving
//! at-least-once delivery across crashes.
//!
//! # Modules
//!
//! - [`consumer`]: restart-safe polling consumer with cursor checkpointing
//! - [`cursor_store`]: durable cursor persistence (SQLite and in-memory)
//! - [`dto`]: wire-format shapes for the query surface
//! - [`event`]: stream events and the composite `(created_at, id)` cursor
//! - [`pipeline`]: assembled lifecycle object wiring a source to the model
//! - [`read_model`]: the session fold, SLA alerts, and the shared handle
//! - [`sla`]: read-time staleness classification
//! - [`source`]: event-source access to the PSEE log (SQLite and in-memory)

pub mod consumer;
pub mod cursor_store;
pub mod dto;
pub mod event;
pub mod pipeline;
pub mod read_model;
pub mod sla;
pub mod source;
