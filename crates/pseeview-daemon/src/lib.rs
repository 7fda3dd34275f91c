//! pseeview-daemon - PSEE read-model daemon library
//!
//! Hosts the session pipeline from `pseeview-core` behind an HTTP query
//! surface. The daemon tails the Production Session Event log out of a
//! SQLite database, folds it into the in-memory read model, and serves
//! dashboard queries; the read model is disposable and rebuilt by replay,
//! so the daemon holds no state of record beyond its cursor checkpoint.
//!
//! # Modules
//!
//! - [`config`]: TOML configuration for the server and the pipeline
//! - [`http`]: axum router serving sessions, alerts, stats, and health

pub mod config;
pub mod http;
