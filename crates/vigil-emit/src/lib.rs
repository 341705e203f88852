//! Agent-side emitter for the Vigil collector.
//!
//! Hooks hand each lifecycle event to an [`Emitter`], which posts it to the
//! collector with a few quick retries and falls back to a per-producer queue
//! file that is drained on a later successful delivery.

pub mod client;
pub mod config;
pub mod emitter;
pub mod hook;
pub mod queue;

pub use client::{CollectorClient, DeliveryError};
pub use config::EmitterConfig;
pub use emitter::{Emitter, FlushReport, SubmitOutcome};
pub use hook::{HookOptions, build_event};
pub use queue::{DeliveryQueue, QueueEntry, QueueError};
