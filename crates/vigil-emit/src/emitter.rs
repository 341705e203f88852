//! Retrying submission with a durable fallback queue.
//!
//! [`Emitter::submit`] never fails. An event is either accepted by the
//! collector, written to the producer's queue file for a later invocation,
//! refused outright, or lost because the queue itself could not be written.
//!
//! Per-producer order is kept by never sending a new event past a non-empty
//! queue: the queue is flushed first and, if anything is left in it, the new
//! event joins the back without touching the network.

use vigil_core::event::{Event, NewEvent};

use crate::{
  client::{CollectorClient, DeliveryError},
  config::EmitterConfig,
  queue::{DeliveryQueue, QueueEntry},
};

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
  /// Stored by the collector.
  Delivered(Event),
  /// Written to the queue file for a later flush.
  Queued,
  /// The collector refused the event; it was not queued.
  Rejected(String),
  /// Neither the collector nor the queue file accepted the event.
  Lost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
  pub delivered: usize,
  pub remaining: usize,
  /// Entries the collector refused; they are removed from the queue.
  pub dropped:   usize,
}

pub struct Emitter {
  config: EmitterConfig,
  client: CollectorClient,
  queue:  DeliveryQueue,
}

impl Emitter {
  pub fn new(config: EmitterConfig) -> reqwest::Result<Self> {
    let client = CollectorClient::new(config.events_url(), config.attempt_timeout)?;
    let queue = DeliveryQueue::new(config.queue_path.clone());
    Ok(Self { config, client, queue })
  }

  pub fn config(&self) -> &EmitterConfig { &self.config }

  pub fn queue(&self) -> &DeliveryQueue { &self.queue }

  pub async fn submit(&self, event: &NewEvent) -> SubmitOutcome {
    match self.queue.is_empty() {
      Ok(true) => {}
      Ok(false) => {
        let report = self.flush().await;
        if report.remaining > 0 {
          tracing::debug!(remaining = report.remaining, "queue still blocked, appending");
          return self.enqueue(event, 0);
        }
      }
      Err(error) => tracing::warn!(%error, "could not read delivery queue"),
    }

    match self.send_with_retry(event).await {
      Ok(stored) => {
        self.flush().await;
        SubmitOutcome::Delivered(stored)
      }
      Err((error, _)) if error.is_permanent() => {
        tracing::warn!(%error, event_kind = %event.event_kind, "event rejected by collector");
        SubmitOutcome::Rejected(error.to_string())
      }
      Err((error, attempts)) => {
        tracing::warn!(%error, attempts, "collector unreachable, queueing event");
        self.enqueue(event, attempts)
      }
    }
  }

  /// Resend queued entries oldest first, once each.
  ///
  /// Stops at the first entry that fails transiently so nothing overtakes it;
  /// that entry's attempt count is bumped and it and everything after it stay
  /// queued. Refused entries are dropped.
  pub async fn flush(&self) -> FlushReport {
    let entries = match self.queue.load() {
      Ok(entries) => entries,
      Err(error) => {
        tracing::warn!(%error, "could not read delivery queue");
        return FlushReport::default();
      }
    };
    if entries.is_empty() {
      return FlushReport::default();
    }

    let mut report = FlushReport::default();
    let mut kept = Vec::new();
    let mut pending = entries.into_iter();

    while let Some(mut entry) = pending.next() {
      match self.client.post_event(&entry.event).await {
        Ok(_) => report.delivered += 1,
        Err(error) if error.is_permanent() => {
          tracing::warn!(
            %error,
            event_kind = %entry.event.event_kind,
            queued_at = entry.queued_at,
            "dropping queued event the collector refused"
          );
          report.dropped += 1;
        }
        Err(error) => {
          tracing::debug!(%error, "flush interrupted");
          entry.attempts += 1;
          kept.push(entry);
          kept.extend(pending);
          break;
        }
      }
    }

    report.remaining = kept.len();
    if let Err(error) = self.queue.rewrite(&kept) {
      tracing::warn!(%error, "could not rewrite delivery queue");
    }
    if report.delivered > 0 || report.dropped > 0 {
      tracing::info!(
        delivered = report.delivered,
        dropped = report.dropped,
        remaining = report.remaining,
        "delivery queue flushed"
      );
    }
    report
  }

  /// Up to `max_attempts` posts with exponential backoff between them. On
  /// failure the last error is returned with the number of attempts made.
  async fn send_with_retry(&self, event: &NewEvent) -> Result<Event, (DeliveryError, u32)> {
    let max_attempts = self.config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
      match self.client.post_event(event).await {
        Ok(stored) => return Ok(stored),
        Err(error) => {
          attempt += 1;
          if error.is_permanent() || attempt >= max_attempts {
            return Err((error, attempt));
          }
          tracing::debug!(%error, attempt, "delivery attempt failed");
          tokio::time::sleep(self.config.backoff(attempt - 1)).await;
        }
      }
    }
  }

  fn enqueue(&self, event: &NewEvent, attempts: u32) -> SubmitOutcome {
    match self.queue.append(&QueueEntry::new(event.clone(), attempts)) {
      Ok(()) => SubmitOutcome::Queued,
      Err(error) => {
        tracing::warn!(%error, "could not queue event, it is lost");
        SubmitOutcome::Lost
      }
    }
  }
}
