//! Handlers for `/events` and its sub-routes.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State, rejection::JsonRejection},
  http::{HeaderName, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
};
use serde::Deserialize;
use vigil_core::{
  decision::Decision,
  event::{Event, NewEvent},
  store::{DEFAULT_QUERY_LIMIT, EventFilter, EventStore, FilterOptions},
};

use crate::{collector::Collector, error::ApiError};

/// Maximum `limit` accepted by `GET /events/recent`.
pub const MAX_RECENT_LIMIT: usize = 1000;

/// Response header carrying the [`DeliveryOutcome`](crate::DeliveryOutcome)
/// of a decision push.
pub const DELIVERY_HEADER: HeaderName = HeaderName::from_static("x-vigil-delivery");

/// `POST /events`
pub async fn create<S: EventStore>(
  State(collector): State<Arc<Collector<S>>>,
  body: Result<Json<NewEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
  let Json(event) = body?;
  let stored = collector.ingest(event).await?;
  Ok((StatusCode::CREATED, Json(stored)))
}

/// `GET /events/{id}`
pub async fn get_one<S: EventStore>(
  State(collector): State<Arc<Collector<S>>>,
  Path(id): Path<i64>,
) -> Result<Json<Event>, ApiError> {
  collector
    .store()
    .get(id)
    .await
    .map_err(ApiError::store)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("event {id}")))
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentParams {
  pub limit: Option<usize>,
}

/// `GET /events/recent[?limit=N]`
pub async fn recent<S: EventStore>(
  State(collector): State<Arc<Collector<S>>>,
  Query(params): Query<RecentParams>,
) -> Result<Json<Vec<Event>>, ApiError> {
  let limit = params.limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(MAX_RECENT_LIMIT);
  let events = collector.store().recent(limit).await.map_err(ApiError::store)?;
  Ok(Json(events))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
  /// Text matched against payload, summary and chat. Blank means filters
  /// only.
  pub q:           Option<String>,
  /// Inclusive lower bound on `created_at`, ms.
  pub from:        Option<i64>,
  /// Inclusive upper bound on `created_at`, ms.
  pub to:          Option<i64>,
  pub producer_id: Option<String>,
  pub stream_id:   Option<String>,
  pub event_kind:  Option<String>,
  pub limit:       Option<usize>,
}

fn non_empty(s: Option<String>) -> Option<String> { s.filter(|s| !s.trim().is_empty()) }

/// `GET /events/search?q=...[&from=..][&to=..][&producer_id=..][&stream_id=..][&event_kind=..][&limit=..]`
pub async fn search<S: EventStore>(
  State(collector): State<Arc<Collector<S>>>,
  Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Event>>, ApiError> {
  if let (Some(from), Some(to)) = (params.from, params.to) {
    if from > to {
      return Err(ApiError::BadRequest(format!("from ({from}) is after to ({to})")));
    }
  }

  let max = collector.config().search_limit;
  let filter = EventFilter {
    producer_id: non_empty(params.producer_id),
    stream_id:   non_empty(params.stream_id),
    event_kind:  non_empty(params.event_kind),
    from:        params.from,
    to:          params.to,
    limit:       Some(params.limit.unwrap_or(max).min(max)),
  };
  let text = params.q.unwrap_or_default();

  let events = collector
    .store()
    .search(&text, &filter)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(events))
}

/// `GET /events/filter-options`
pub async fn filter_options<S: EventStore>(
  State(collector): State<Arc<Collector<S>>>,
) -> Result<Json<FilterOptions>, ApiError> {
  let options = collector.store().filter_options().await.map_err(ApiError::store)?;
  Ok(Json(options))
}

/// `POST /events/{id}/respond`
pub async fn respond<S: EventStore>(
  State(collector): State<Arc<Collector<S>>>,
  Path(id): Path<i64>,
  body: Result<Json<Decision>, JsonRejection>,
) -> Result<Response, ApiError> {
  let Json(decision) = body?;
  let (event, outcome) = collector
    .respond(id, decision)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("event {id}")))?;

  let mut response = Json(event).into_response();
  response
    .headers_mut()
    .insert(DELIVERY_HEADER, HeaderValue::from_static(outcome.as_str()));
  Ok(response)
}
