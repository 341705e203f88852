//! Event types.
//!
//! An event is an immutable fact emitted by an agent session at one point of
//! its lifecycle. Once stored, only its [`HumanDecision`] may change, and only
//! in one direction (see [`crate::decision`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{Error, Result, decision::HumanDecision};

// ─── Submission ──────────────────────────────────────────────────────────────

/// An event as submitted by an emitter: no id, timestamp, derived fields or
/// decision state yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
  /// The emitting application (e.g. a project or repository name).
  pub producer_id:   String,
  /// The logical session within the producer.
  pub stream_id:     String,
  /// The lifecycle phase, e.g. `PreToolUse` or `SessionStart`.
  pub event_kind:    String,
  /// Open, kind-specific document. Never validated beyond being present.
  pub payload:       Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary:       Option<String>,
  /// Chat transcript, one JSON value per message.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub chat:          Option<Vec<Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model_name:    Option<String>,
  /// Git/session/environment facts attached by the emitter before submission.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata:      Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub human_request: Option<HumanRequest>,
}

impl NewEvent {
  /// Convenience constructor with every optional field absent.
  pub fn new(
    producer_id: impl Into<String>,
    stream_id: impl Into<String>,
    event_kind: impl Into<String>,
    payload: Value,
  ) -> Self {
    Self {
      producer_id: producer_id.into(),
      stream_id: stream_id.into(),
      event_kind: event_kind.into(),
      payload,
      summary: None,
      chat: None,
      model_name: None,
      metadata: None,
      human_request: None,
    }
  }

  /// Check the envelope fields. The payload itself is open and only has to
  /// be present.
  pub fn validate(&self) -> Result<()> {
    if self.producer_id.trim().is_empty() {
      return Err(Error::MissingField("producer_id"));
    }
    if self.stream_id.trim().is_empty() {
      return Err(Error::MissingField("stream_id"));
    }
    if self.event_kind.trim().is_empty() {
      return Err(Error::MissingField("event_kind"));
    }
    if self.payload.is_null() {
      return Err(Error::MissingField("payload"));
    }
    if let Some(request) = &self.human_request {
      request.validate()?;
    }
    Ok(())
  }
}

// ─── Human-in-the-loop request ───────────────────────────────────────────────

/// What sort of answer the agent is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
  #[default]
  Question,
  Permission,
  Choice,
}

/// A decision point raised by an agent. The agent listens on `callback` for
/// the decision to be pushed back to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanRequest {
  pub question:     String,
  /// `ws://` or `wss://` endpoint advertised by the waiting agent process.
  pub callback:     String,
  #[serde(default)]
  pub kind:         RequestKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub choices:      Option<Vec<String>>,
  /// How long the agent intends to wait, in seconds.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_secs: Option<u64>,
}

impl HumanRequest {
  pub fn validate(&self) -> Result<()> {
    if self.question.trim().is_empty() {
      return Err(Error::InvalidHumanRequest("question is empty".into()));
    }
    let url = Url::parse(&self.callback).map_err(|e| {
      Error::InvalidHumanRequest(format!("callback {:?}: {e}", self.callback))
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
      return Err(Error::InvalidHumanRequest(format!(
        "callback scheme must be ws or wss, got {:?}",
        url.scheme()
      )));
    }
    if self.kind == RequestKind::Choice
      && self.choices.as_ref().is_none_or(|c| c.is_empty())
    {
      return Err(Error::InvalidHumanRequest(
        "choice requests need at least one choice".into(),
      ));
    }
    Ok(())
  }
}

// ─── Stored event ────────────────────────────────────────────────────────────

/// Token counts extracted from a payload at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
  pub input_tokens:          u64,
  pub output_tokens:         u64,
  #[serde(default)]
  pub cache_creation_tokens: u64,
  #[serde(default)]
  pub cache_read_tokens:     u64,
}

/// A persisted event.
///
/// Every optional field may be missing regardless of the event's age: rows
/// written before a column existed read it back as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  /// Store-assigned, monotonic, never reused.
  pub id:             i64,
  pub producer_id:    String,
  pub stream_id:      String,
  pub event_kind:     String,
  pub payload:        Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary:        Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub chat:           Option<Vec<Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model_name:     Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata:       Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub usage:          Option<TokenUsage>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cost_usd:       Option<f64>,
  /// Collector-assigned, milliseconds since the Unix epoch.
  pub created_at:     i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub human_request:  Option<HumanRequest>,
  #[serde(default)]
  pub human_decision: HumanDecision,
}

impl Event {
  /// The callback to push a decision to, if this event asked for one.
  pub fn callback(&self) -> Option<&str> {
    self.human_request.as_ref().map(|r| r.callback.as_str())
  }
}
