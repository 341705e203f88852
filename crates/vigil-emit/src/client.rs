//! HTTP client for the collector's ingest endpoint.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use vigil_core::event::{Event, NewEvent};

#[derive(Debug, Error)]
pub enum DeliveryError {
  /// Connection refused, DNS failure, timeout, or an unreadable response.
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  /// The collector refused the event itself. Retrying cannot help.
  #[error("collector rejected event ({status}): {message}")]
  Rejected { status: u16, message: String },

  #[error("collector unavailable ({0})")]
  Unavailable(u16),
}

impl DeliveryError {
  /// Whether the event should be dropped rather than retried.
  pub fn is_permanent(&self) -> bool { matches!(self, Self::Rejected { .. }) }
}

#[derive(Deserialize)]
struct ErrorBody {
  error: String,
}

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Debug, Clone)]
pub struct CollectorClient {
  client:     Client,
  events_url: String,
}

impl CollectorClient {
  pub fn new(events_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .user_agent(concat!("vigil-emit/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client, events_url: events_url.into() })
  }

  pub fn events_url(&self) -> &str { &self.events_url }

  /// `POST /events`
  pub async fn post_event(&self, event: &NewEvent) -> Result<Event, DeliveryError> {
    let resp = self.client.post(&self.events_url).json(event).send().await?;

    let status = resp.status();
    if status.is_success() {
      return Ok(resp.json().await?);
    }

    if is_permanent_status(status) {
      let body = resp.text().await.unwrap_or_default();
      let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
      return Err(DeliveryError::Rejected { status: status.as_u16(), message });
    }
    Err(DeliveryError::Unavailable(status.as_u16()))
  }
}

/// 4xx other than timeouts and rate limiting.
fn is_permanent_status(status: StatusCode) -> bool {
  status.is_client_error()
    && status != StatusCode::REQUEST_TIMEOUT
    && status != StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_definite_client_errors_are_permanent() {
    assert!(is_permanent_status(StatusCode::BAD_REQUEST));
    assert!(is_permanent_status(StatusCode::UNPROCESSABLE_ENTITY));
    assert!(!is_permanent_status(StatusCode::REQUEST_TIMEOUT));
    assert!(!is_permanent_status(StatusCode::TOO_MANY_REQUESTS));
    assert!(!is_permanent_status(StatusCode::SERVICE_UNAVAILABLE));
    assert!(!is_permanent_status(StatusCode::INTERNAL_SERVER_ERROR));
  }
}
