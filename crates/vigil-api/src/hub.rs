//! Fan-out of stored events to live observers.
//!
//! Each observer owns a bounded channel of pre-serialised JSON messages. A
//! broadcast serialises the event once and hands the same `Arc<str>` to every
//! observer with a non-blocking `try_send`, so one slow observer can never
//! stall the others or the ingest path. An observer whose channel is full or
//! closed is dropped from the set; it can reconnect and bootstrap again.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex, MutexGuard, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
  },
};

use serde::Serialize;
use tokio::sync::mpsc;
use vigil_core::event::Event;

/// Messages buffered per observer before it is considered too slow.
pub const DEFAULT_OBSERVER_BUFFER: usize = 256;

/// Wire format of the observer stream.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamMessage<'a> {
  /// The bootstrap window, oldest first. Always the first message.
  Initial(&'a [Event]),
  Event(&'a Event),
}

type Observers = HashMap<u64, mpsc::Sender<Arc<str>>>;

struct Inner {
  observers: Mutex<Observers>,
  next_id:   AtomicU64,
  buffer:    usize,
}

impl Inner {
  fn observers(&self) -> MutexGuard<'_, Observers> {
    self.observers.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// The set of connected observers. Cloning shares the set.
#[derive(Clone)]
pub struct Hub {
  inner: Arc<Inner>,
}

impl Default for Hub {
  fn default() -> Self { Self::new(DEFAULT_OBSERVER_BUFFER) }
}

impl Hub {
  pub fn new(buffer: usize) -> Self {
    Self {
      inner: Arc::new(Inner {
        observers: Mutex::new(HashMap::new()),
        next_id:   AtomicU64::new(1),
        buffer:    buffer.max(1),
      }),
    }
  }

  /// Add an observer whose first message is `initial`.
  ///
  /// Callers that need a gap-free hand-over from `initial` to the live stream
  /// must hold off broadcasts between fetching `initial` and this call.
  pub fn register(&self, initial: &[Event]) -> Result<Subscription, serde_json::Error> {
    let message: Arc<str> = serde_json::to_string(&StreamMessage::Initial(initial))?.into();

    let (tx, rx) = mpsc::channel(self.inner.buffer);
    // A fresh channel always has room for one message.
    let _ = tx.try_send(message);

    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    self.inner.observers().insert(id, tx);
    tracing::debug!(observer = id, window = initial.len(), "observer registered");

    Ok(Subscription { id, rx, hub: Arc::downgrade(&self.inner) })
  }

  /// Send `event` to every current observer. Returns how many received it.
  pub fn broadcast(&self, event: &Event) -> usize {
    let message: Arc<str> = match serde_json::to_string(&StreamMessage::Event(event)) {
      Ok(m) => m.into(),
      Err(error) => {
        tracing::warn!(id = event.id, %error, "failed to serialise event for observers");
        return 0;
      }
    };

    let snapshot: Vec<(u64, mpsc::Sender<Arc<str>>)> = self
      .inner
      .observers()
      .iter()
      .map(|(id, tx)| (*id, tx.clone()))
      .collect();

    let mut dropped = Vec::new();
    for (id, tx) in &snapshot {
      if let Err(error) = tx.try_send(Arc::clone(&message)) {
        let reason = match error {
          mpsc::error::TrySendError::Full(_) => "full",
          mpsc::error::TrySendError::Closed(_) => "closed",
        };
        tracing::debug!(observer = id, reason, "dropping observer");
        dropped.push(*id);
      }
    }

    if !dropped.is_empty() {
      let mut observers = self.inner.observers();
      for id in &dropped {
        observers.remove(id);
      }
    }

    snapshot.len() - dropped.len()
  }

  pub fn observer_count(&self) -> usize { self.inner.observers().len() }
}

/// A registered observer. Dropping it unregisters.
pub struct Subscription {
  id:  u64,
  rx:  mpsc::Receiver<Arc<str>>,
  hub: Weak<Inner>,
}

impl Subscription {
  pub fn id(&self) -> u64 { self.id }

  /// The next serialised message, or `None` once the hub has dropped this
  /// observer and the buffer is drained.
  pub async fn recv(&mut self) -> Option<Arc<str>> { self.rx.recv().await }

  pub fn unregister(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(inner) = self.hub.upgrade() {
      inner.observers().remove(&self.id);
    }
  }
}
