//! Event model, human-decision state, cost derivation and the
//! [`store::EventStore`] trait shared by the Vigil collector, its SQLite
//! store and the agent-side emitter.
//!
//! No HTTP or database code lives here.

pub mod cost;
pub mod decision;
pub mod error;
pub mod event;
pub mod store;

pub use error::{Error, Result};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 { chrono::Utc::now().timestamp_millis() }
