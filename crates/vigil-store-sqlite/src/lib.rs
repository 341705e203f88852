//! SQLite backend for the Vigil event store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Full-text search uses an FTS5 trigram
//! index with a substring-scan fallback.

mod encode;
mod schema;
mod search;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use schema::LATEST_VERSION;
pub use store::{SqliteStore, StoreOptions};
