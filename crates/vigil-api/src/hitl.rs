//! Human-in-the-loop correlation: routing a stored decision back to the agent
//! process that asked for it.
//!
//! When an event carrying a [`HumanRequest`](vigil_core::event::HumanRequest)
//! is stored, [`HitlRegistry::track`] remembers its callback. When a decision
//! for that event is stored, [`HitlRegistry::deliver`] pushes a
//! [`DecisionEnvelope`] to the callback over a [`DecisionTransport`], bounded
//! by the delivery timeout. Delivery is best effort: the store is the source
//! of truth and a failed push is logged, never retried.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard, Once, PoisonError},
  time::Duration,
};

use futures_util::{SinkExt as _, future::BoxFuture};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use vigil_core::{
  decision::{Decision, HumanDecision},
  event::Event,
};

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(60 * 60);

// ─── Wire types ──────────────────────────────────────────────────────────────

/// The single message pushed to an agent's callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEnvelope {
  pub event_id:    i64,
  pub decision:    Decision,
  pub resolved_at: i64,
}

/// What happened to a decision push. Reported to the responder in the
/// `x-vigil-delivery` header; never turns into an HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
  Delivered,
  Failed(String),
  TimedOut,
  /// Neither the registry nor the stored event knows where to deliver.
  NoCallback,
  /// The event has no decision to deliver.
  NotResolved,
}

impl DeliveryOutcome {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Delivered => "delivered",
      Self::Failed(_) => "failed",
      Self::TimedOut => "timed_out",
      Self::NoCallback => "no_callback",
      Self::NotResolved => "not_resolved",
    }
  }
}

// ─── Transport ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("websocket: {0}")]
  WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

  #[error("{0}")]
  Rejected(String),
}

/// Outbound channel to a waiting agent.
pub trait DecisionTransport: Send + Sync {
  fn deliver<'a>(
    &'a self,
    callback: &'a str,
    message: String,
  ) -> BoxFuture<'a, Result<(), TransportError>>;
}

/// Connects to the `ws://`/`wss://` callback, sends one text frame and closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

/// `wss://` connects need a process-wide rustls crypto provider.
fn install_crypto_provider() {
  static INSTALL: Once = Once::new();
  INSTALL.call_once(|| {
    // Err means another provider is already installed, which is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();
  });
}

impl DecisionTransport for WebSocketTransport {
  fn deliver<'a>(
    &'a self,
    callback: &'a str,
    message: String,
  ) -> BoxFuture<'a, Result<(), TransportError>> {
    Box::pin(async move {
      install_crypto_provider();
      let (mut socket, _) = tokio_tungstenite::connect_async(callback).await?;
      socket.send(Message::Text(message.into())).await?;
      socket.flush().await?;
      // The frame is out; an agent that hangs up first is not a failure.
      if let Err(error) = socket.close(None).await {
        tracing::debug!(callback, %error, "callback closed before close handshake");
      }
      Ok(())
    })
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// A request awaiting its decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
  pub callback:      String,
  pub registered_at: i64,
  pub expires_at:    i64,
}

pub struct HitlRegistry {
  entries:          Mutex<HashMap<i64, Correlation>>,
  transport:        Arc<dyn DecisionTransport>,
  delivery_timeout: Duration,
  request_ttl:      Duration,
}

impl HitlRegistry {
  pub fn new(transport: Arc<dyn DecisionTransport>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      transport,
      delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
      request_ttl: DEFAULT_REQUEST_TTL,
    }
  }

  pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
    self.delivery_timeout = timeout;
    self
  }

  /// Lifetime of an entry whose request carries no `timeout_secs`.
  pub fn with_request_ttl(mut self, ttl: Duration) -> Self {
    self.request_ttl = ttl;
    self
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<i64, Correlation>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Start awaiting a decision for `event`. Returns `false` if the event has
  /// no request or is already resolved.
  pub fn track(&self, event: &Event) -> bool {
    let Some(request) = &event.human_request else {
      return false;
    };
    if event.human_decision.is_resolved() {
      return false;
    }

    let ttl_ms = match request.timeout_secs {
      Some(secs) => secs.saturating_mul(1000),
      None => u64::try_from(self.request_ttl.as_millis()).unwrap_or(u64::MAX),
    };
    let registered_at = event.created_at;
    let expires_at = registered_at.saturating_add(i64::try_from(ttl_ms).unwrap_or(i64::MAX));

    self.entries().insert(event.id, Correlation {
      callback: request.callback.clone(),
      registered_at,
      expires_at,
    });
    tracing::debug!(id = event.id, callback = %request.callback, "awaiting decision");
    true
  }

  pub fn is_awaiting(&self, event_id: i64) -> bool { self.entries().contains_key(&event_id) }

  pub fn correlation(&self, event_id: i64) -> Option<Correlation> {
    self.entries().get(&event_id).cloned()
  }

  pub fn pending_count(&self) -> usize { self.entries().len() }

  /// Push the decision stored on `event` to its callback.
  ///
  /// The entry is removed first. Without an entry (expired, or the collector
  /// restarted since the request) the callback stored on the event is used.
  pub async fn deliver(&self, event: &Event) -> DeliveryOutcome {
    let HumanDecision::Resolved { decision, resolved_at } = &event.human_decision else {
      return DeliveryOutcome::NotResolved;
    };

    let entry = self.entries().remove(&event.id);
    let callback = match (entry, event.callback()) {
      (Some(entry), _) => entry.callback,
      (None, Some(stored)) => stored.to_owned(),
      (None, None) => return DeliveryOutcome::NoCallback,
    };

    let envelope = DecisionEnvelope {
      event_id:    event.id,
      decision:    decision.clone(),
      resolved_at: *resolved_at,
    };
    let message = match serde_json::to_string(&envelope) {
      Ok(m) => m,
      Err(e) => return DeliveryOutcome::Failed(e.to_string()),
    };

    let outcome = match tokio::time::timeout(
      self.delivery_timeout,
      self.transport.deliver(&callback, message),
    )
    .await
    {
      Ok(Ok(())) => DeliveryOutcome::Delivered,
      Ok(Err(e)) => DeliveryOutcome::Failed(e.to_string()),
      Err(_) => DeliveryOutcome::TimedOut,
    };

    match &outcome {
      DeliveryOutcome::Delivered => {
        tracing::info!(id = event.id, %callback, "decision delivered");
      }
      DeliveryOutcome::Failed(reason) => {
        tracing::warn!(id = event.id, %callback, %reason, "decision delivery failed");
      }
      other => {
        tracing::warn!(id = event.id, %callback, outcome = other.as_str(), "decision not delivered");
      }
    }
    outcome
  }

  /// Drop entries whose agent has stopped waiting. Returns how many.
  pub fn sweep_expired(&self, now_ms: i64) -> usize {
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|_, c| c.expires_at > now_ms);
    before - entries.len()
  }
}
