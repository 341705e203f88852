//! Error types for `vigil-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A required envelope field is missing or blank.
  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("invalid human request: {0}")]
  InvalidHumanRequest(String),

  #[error("decision must carry a response, a permission or a choice")]
  EmptyDecision,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
