//! Error type for `vigil-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error in column {column}: {source}")]
  Json {
    column: &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid event: {0}")]
  Invalid(#[from] vigil_core::Error),

  #[error("negative token count in column {0}")]
  NegativeCount(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
