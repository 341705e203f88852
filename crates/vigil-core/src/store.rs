//! The `EventStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `vigil-store-sqlite`).
//! Higher layers (`vigil-api`, `vigil-server`) depend on this abstraction, not
//! on any concrete backend.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  decision::Decision,
  event::{Event, NewEvent},
};

/// Default number of rows returned by [`EventStore::query`].
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Default number of rows returned by [`EventStore::search`].
pub const DEFAULT_SEARCH_LIMIT: usize = 500;

// ─── Query types ─────────────────────────────────────────────────────────────

/// Conjunctive filters shared by [`EventStore::query`] and
/// [`EventStore::search`]. Every `None` field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
  pub producer_id: Option<String>,
  pub stream_id:   Option<String>,
  pub event_kind:  Option<String>,
  /// Inclusive lower bound on `created_at` (ms).
  pub from:        Option<i64>,
  /// Inclusive upper bound on `created_at` (ms).
  pub to:          Option<i64>,
  pub limit:       Option<usize>,
}

/// Distinct values seen in the store, for building filter pickers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
  pub producer_ids: Vec<String>,
  pub stream_ids:   Vec<String>,
  pub event_kinds:  Vec<String>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Vigil event store backend.
///
/// The store is append-only apart from the decision state of an event. All
/// result lists are ordered newest first (`created_at`, then `id`).
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait EventStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist an event, assigning `id` and `created_at` and computing derived
  /// fields. The search index is updated in the same operation.
  fn insert(
    &self,
    event: NewEvent,
  ) -> impl Future<Output = Result<Event, Self::Error>> + Send + '_;

  /// Retrieve an event by id. Returns `None` if not found.
  fn get(&self, id: i64) -> impl Future<Output = Result<Option<Event>, Self::Error>> + Send + '_;

  /// The `limit` most recent events.
  fn recent(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + '_;

  /// Events matching `filter`.
  fn query<'a>(
    &'a self,
    filter: &'a EventFilter,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a;

  /// Events whose payload, summary or chat contains `text`, narrowed by
  /// `filter`. Blank `text` behaves like [`EventStore::query`] with the search
  /// limit.
  fn search<'a>(
    &'a self,
    text: &'a str,
    filter: &'a EventFilter,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a;

  /// Resolve the decision of an event. Returns `None` if the id is unknown.
  ///
  /// Calling this on an already-resolved event replaces the decision.
  fn update_human_decision(
    &self,
    id: i64,
    decision: Decision,
  ) -> impl Future<Output = Result<Option<Event>, Self::Error>> + Send + '_;

  fn filter_options(
    &self,
  ) -> impl Future<Output = Result<FilterOptions, Self::Error>> + Send + '_;
}
