//! The [`Collector`] service: one store, one observer hub, one HITL registry.
//!
//! Every operation that changes what observers see runs behind a single async
//! sequencer, so the order in which events reach the hub is the store's
//! commit order and an observer's bootstrap window always ends exactly where
//! its live stream begins.

use tokio::sync::Mutex;
use vigil_core::{
  decision::Decision,
  event::{Event, NewEvent},
  store::{DEFAULT_SEARCH_LIMIT, EventStore},
};

use crate::{
  error::ApiError,
  hitl::{DeliveryOutcome, HitlRegistry},
  hub::{Hub, Subscription},
};

pub const DEFAULT_RECENT_WINDOW: usize = 300;

/// Largest accepted `POST /events` body. Events can carry whole chat
/// transcripts, so this is well above axum's 2 MiB default.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorConfig {
  /// Events sent to a new observer before its live stream starts.
  pub recent_window:   usize,
  /// Default and maximum result count for searches.
  pub search_limit:    usize,
  /// Body limit of `POST /events`, in bytes.
  pub max_event_bytes: usize,
}

impl Default for CollectorConfig {
  fn default() -> Self {
    Self {
      recent_window:   DEFAULT_RECENT_WINDOW,
      search_limit:    DEFAULT_SEARCH_LIMIT,
      max_event_bytes: DEFAULT_MAX_EVENT_BYTES,
    }
  }
}

pub struct Collector<S> {
  store:     S,
  hub:       Hub,
  hitl:      HitlRegistry,
  config:    CollectorConfig,
  sequencer: Mutex<()>,
}

impl<S: EventStore> Collector<S> {
  pub fn new(store: S, hitl: HitlRegistry, config: CollectorConfig) -> Self {
    Self { store, hub: Hub::default(), hitl, config, sequencer: Mutex::new(()) }
  }

  pub fn with_hub(mut self, hub: Hub) -> Self {
    self.hub = hub;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn hub(&self) -> &Hub { &self.hub }

  pub fn hitl(&self) -> &HitlRegistry { &self.hitl }

  pub fn config(&self) -> &CollectorConfig { &self.config }

  /// Validate, store, start awaiting a decision if one was requested, and
  /// broadcast.
  pub async fn ingest(&self, event: NewEvent) -> Result<Event, ApiError> {
    event.validate()?;

    let _seq = self.sequencer.lock().await;
    let stored = self.store.insert(event).await.map_err(ApiError::store)?;
    self.hitl.track(&stored);
    self.hub.broadcast(&stored);
    tracing::debug!(
      id = stored.id,
      producer = %stored.producer_id,
      kind = %stored.event_kind,
      "event ingested"
    );
    Ok(stored)
  }

  /// Store a decision, broadcast the updated event, then push the decision
  /// to the waiting agent. Returns `None` for an unknown event.
  ///
  /// Resolving an already-resolved event replaces its decision and pushes
  /// again.
  pub async fn respond(
    &self,
    id: i64,
    decision: Decision,
  ) -> Result<Option<(Event, DeliveryOutcome)>, ApiError> {
    decision.validate()?;

    let updated = {
      let _seq = self.sequencer.lock().await;
      let Some(updated) = self
        .store
        .update_human_decision(id, decision)
        .await
        .map_err(ApiError::store)?
      else {
        return Ok(None);
      };
      self.hub.broadcast(&updated);
      updated
    };

    // Outside the sequencer: a slow agent must not hold up ingest.
    let outcome = self.hitl.deliver(&updated).await;
    Ok(Some((updated, outcome)))
  }

  /// Register a new observer with the most recent events, oldest first.
  pub async fn subscribe(&self) -> Result<Subscription, ApiError> {
    let _seq = self.sequencer.lock().await;
    let mut window = self
      .store
      .recent(self.config.recent_window)
      .await
      .map_err(ApiError::store)?;
    window.reverse();
    self.hub.register(&window).map_err(ApiError::store)
  }
}
