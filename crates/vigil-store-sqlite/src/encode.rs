//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as integer milliseconds. Structured fields (payload,
//! chat, metadata, human request, decision) are stored as compact JSON.
//! Every column added after version 1 is nullable and decodes to `None`.

use rusqlite::Row;
use serde::{Serialize, de::DeserializeOwned};
use vigil_core::{
  decision::{Decision, HumanDecision},
  event::{Event, TokenUsage},
};

use crate::{Error, Result};

/// Column list shared by every `SELECT` that produces a [`RawEvent`], prefixed
/// with the `e.` alias so it can be used in joins.
pub const EVENT_COLUMNS: &str = "
  e.id, e.producer_id, e.stream_id, e.event_kind, e.payload_json,
  e.summary, e.chat_json, e.created_at,
  e.human_request_json, e.decision_json, e.resolved_at,
  e.model_name, e.metadata_json,
  e.input_tokens, e.output_tokens, e.cache_creation_tokens, e.cache_read_tokens,
  e.cost_usd
";

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_json<T: Serialize>(column: &'static str, value: &T) -> Result<String> {
  serde_json::to_string(value).map_err(|source| Error::Json { column, source })
}

pub fn encode_json_opt<T: Serialize>(
  column: &'static str,
  value: Option<&T>,
) -> Result<Option<String>> {
  value.map(|v| encode_json(column, v)).transpose()
}

fn decode_json<T: DeserializeOwned>(column: &'static str, s: &str) -> Result<T> {
  serde_json::from_str(s).map_err(|source| Error::Json { column, source })
}

fn decode_json_opt<T: DeserializeOwned>(
  column: &'static str,
  s: Option<String>,
) -> Result<Option<T>> {
  s.as_deref().map(|s| decode_json(column, s)).transpose()
}

fn decode_count(column: &'static str, n: Option<i64>) -> Result<Option<u64>> {
  n.map(|n| u64::try_from(n).map_err(|_| Error::NegativeCount(column)))
    .transpose()
}

// ─── Raw row ─────────────────────────────────────────────────────────────────

/// An `events` row exactly as SQLite returns it, before JSON decoding.
#[derive(Debug)]
pub struct RawEvent {
  pub id:                    i64,
  pub producer_id:           String,
  pub stream_id:             String,
  pub event_kind:            String,
  pub payload_json:          String,
  pub summary:               Option<String>,
  pub chat_json:             Option<String>,
  pub created_at:            i64,
  pub human_request_json:    Option<String>,
  pub decision_json:         Option<String>,
  pub resolved_at:           Option<i64>,
  pub model_name:            Option<String>,
  pub metadata_json:         Option<String>,
  pub input_tokens:          Option<i64>,
  pub output_tokens:         Option<i64>,
  pub cache_creation_tokens: Option<i64>,
  pub cache_read_tokens:     Option<i64>,
  pub cost_usd:              Option<f64>,
}

impl RawEvent {
  /// Read a row selected with [`EVENT_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                    row.get(0)?,
      producer_id:           row.get(1)?,
      stream_id:             row.get(2)?,
      event_kind:            row.get(3)?,
      payload_json:          row.get(4)?,
      summary:               row.get(5)?,
      chat_json:             row.get(6)?,
      created_at:            row.get(7)?,
      human_request_json:    row.get(8)?,
      decision_json:         row.get(9)?,
      resolved_at:           row.get(10)?,
      model_name:            row.get(11)?,
      metadata_json:         row.get(12)?,
      input_tokens:          row.get(13)?,
      output_tokens:         row.get(14)?,
      cache_creation_tokens: row.get(15)?,
      cache_read_tokens:     row.get(16)?,
      cost_usd:              row.get(17)?,
    })
  }

  pub fn into_event(self) -> Result<Event> {
    let human_request = decode_json_opt("human_request_json", self.human_request_json)?;
    let decision: Option<Decision> = decode_json_opt("decision_json", self.decision_json)?;
    let resolved = decision.map(|d| (d, self.resolved_at.unwrap_or(self.created_at)));

    let input = decode_count("input_tokens", self.input_tokens)?;
    let output = decode_count("output_tokens", self.output_tokens)?;
    let usage = match (input, output) {
      (Some(input_tokens), Some(output_tokens)) => Some(TokenUsage {
        input_tokens,
        output_tokens,
        cache_creation_tokens: decode_count("cache_creation_tokens", self.cache_creation_tokens)?
          .unwrap_or(0),
        cache_read_tokens: decode_count("cache_read_tokens", self.cache_read_tokens)?
          .unwrap_or(0),
      }),
      _ => None,
    };

    Ok(Event {
      id: self.id,
      producer_id: self.producer_id,
      stream_id: self.stream_id,
      event_kind: self.event_kind,
      payload: decode_json("payload_json", &self.payload_json)?,
      summary: self.summary,
      chat: decode_json_opt("chat_json", self.chat_json)?,
      model_name: self.model_name,
      metadata: decode_json_opt("metadata_json", self.metadata_json)?,
      usage,
      cost_usd: self.cost_usd,
      created_at: self.created_at,
      human_decision: HumanDecision::from_parts(human_request.is_some(), resolved),
      human_request,
    })
  }
}

pub fn into_events(raws: Vec<RawEvent>) -> Result<Vec<Event>> {
  raws.into_iter().map(RawEvent::into_event).collect()
}
