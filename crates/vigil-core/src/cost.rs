//! Derived fields: token usage and monetary cost.
//!
//! Computed once at insert time from the payload. If the payload carries no
//! usage block the fields stay absent; if the model is unknown, usage is kept
//! but cost stays absent. Nothing here is ever back-filled.

use serde_json::Value;

use crate::event::{NewEvent, TokenUsage};

/// Per-million-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
  pub input:  f64,
  pub output: f64,
}

impl ModelPrice {
  const fn new(input: f64, output: f64) -> Self { Self { input, output } }

  /// Cache writes are billed at 1.25x input, cache reads at 0.1x input.
  pub fn cost(&self, usage: &TokenUsage) -> f64 {
    let per_token = |price: f64| price / 1_000_000.0;
    usage.input_tokens as f64 * per_token(self.input)
      + usage.output_tokens as f64 * per_token(self.output)
      + usage.cache_creation_tokens as f64 * per_token(self.input * 1.25)
      + usage.cache_read_tokens as f64 * per_token(self.input * 0.1)
  }
}

/// Matched in order against the model name; more specific needles first.
const PRICES: &[(&str, ModelPrice)] = &[
  ("opus-4-5", ModelPrice::new(5.0, 25.0)),
  ("opus", ModelPrice::new(15.0, 75.0)),
  ("sonnet", ModelPrice::new(3.0, 15.0)),
  ("haiku-4-5", ModelPrice::new(1.0, 5.0)),
  ("3-5-haiku", ModelPrice::new(0.8, 4.0)),
  ("haiku", ModelPrice::new(0.25, 1.25)),
];

pub fn price_for(model: &str) -> Option<ModelPrice> {
  let model = model.to_ascii_lowercase();
  PRICES
    .iter()
    .find(|(needle, _)| model.contains(needle))
    .map(|(_, price)| *price)
}

/// Fields computed from an event's payload before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Derived {
  pub usage:    Option<TokenUsage>,
  pub cost_usd: Option<f64>,
}

pub fn derive(event: &NewEvent) -> Derived {
  let Some(usage) = extract_usage(&event.payload) else {
    return Derived::default();
  };
  let cost_usd = model_of(event)
    .and_then(price_for)
    .map(|price| price.cost(&usage));
  Derived { usage: Some(usage), cost_usd }
}

/// Looks for an Anthropic-style `usage` block at the top level or under
/// `message`. Both input and output counts are required.
pub fn extract_usage(payload: &Value) -> Option<TokenUsage> {
  let usage = payload
    .get("usage")
    .or_else(|| payload.pointer("/message/usage"))?;
  let count = |key: &str| usage.get(key).and_then(Value::as_u64);

  Some(TokenUsage {
    input_tokens:          count("input_tokens")?,
    output_tokens:         count("output_tokens")?,
    cache_creation_tokens: count("cache_creation_input_tokens").unwrap_or(0),
    cache_read_tokens:     count("cache_read_input_tokens").unwrap_or(0),
  })
}

fn model_of(event: &NewEvent) -> Option<&str> {
  event.model_name.as_deref().or_else(|| {
    event
      .payload
      .get("model")
      .or_else(|| event.payload.pointer("/message/model"))
      .and_then(Value::as_str)
  })
}
