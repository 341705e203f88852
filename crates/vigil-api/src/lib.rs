//! HTTP and WebSocket API for the Vigil collector.
//!
//! Exposes an axum [`Router`] backed by a [`Collector`] over any
//! [`vigil_core::store::EventStore`]. TLS, CORS and tracing layers are the
//! caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let collector = Arc::new(Collector::new(store, registry, CollectorConfig::default()));
//! let app = vigil_api::router(collector.clone());
//! ```

pub mod collector;
pub mod error;
pub mod events;
pub mod hitl;
pub mod hub;
pub mod stream;

use std::sync::Arc;

use axum::{
  Json, Router,
  extract::DefaultBodyLimit,
  routing::{get, post},
};
use serde_json::{Value, json};
use vigil_core::store::EventStore;

pub use collector::{Collector, CollectorConfig, DEFAULT_MAX_EVENT_BYTES};
pub use error::ApiError;
pub use hitl::{DecisionEnvelope, DecisionTransport, DeliveryOutcome, HitlRegistry, WebSocketTransport};
pub use hub::{Hub, StreamMessage, Subscription};

/// Build the full collector router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn router<S>(collector: Arc<Collector<S>>) -> Router<()>
where
  S: EventStore + 'static,
{
  let max_event_bytes = collector.config().max_event_bytes;
  Router::new()
    .route("/health", get(health))
    // Events
    .route(
      "/events",
      post(events::create::<S>).layer(DefaultBodyLimit::max(max_event_bytes)),
    )
    .route("/events/recent", get(events::recent::<S>))
    .route("/events/search", get(events::search::<S>))
    .route("/events/filter-options", get(events::filter_options::<S>))
    .route("/events/{id}", get(events::get_one::<S>))
    .route("/events/{id}/respond", post(events::respond::<S>))
    // Observers
    .route("/stream", get(stream::handler::<S>))
    .with_state(collector)
}

async fn health() -> Json<Value> {
  Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[cfg(test)]
mod tests;
