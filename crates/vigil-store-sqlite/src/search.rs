//! Full-text search over payload, summary and chat.
//!
//! Two [`SearchStrategy`] implementations answer the same logical query:
//!
//! - [`IndexSearch`]: FTS5 `MATCH` against the `events_fts` trigram index.
//! - [`ScanSearch`]: `instr` over the raw `events` columns.
//!
//! Both compare folded text: [`fold`] lowercases every character the same
//! way on the stored side and the query side, and the index is built with
//! `case_sensitive 1` over already-folded text. Payload and chat are stored
//! as JSON, so the query is JSON-escaped (see [`Needle`]) before it is matched
//! against those two columns; the summary is plain text and is matched as
//! typed. A quoted trigram phrase then matches exactly the substrings `instr`
//! finds, so both strategies return the same rows for queries of three or
//! more characters. [`SearchEngine`] tries the index first and re-runs the
//! query as a scan on any error. The index is derived data: the `events`
//! table is authoritative.

use rusqlite::{
  Connection, functions::FunctionFlags, params, types::Value as SqlValue, params_from_iter,
};
use thiserror::Error;
use vigil_core::store::{DEFAULT_SEARCH_LIMIT, EventFilter};

use crate::encode::{EVENT_COLUMNS, RawEvent};

/// Shortest query the trigram index can answer.
const MIN_INDEX_QUERY_CHARS: usize = 3;

/// SQL name of [`fold`].
pub const FOLD_FUNCTION: &str = "vigil_fold";

#[derive(Debug, Error)]
pub enum SearchError {
  #[error("query shorter than {MIN_INDEX_QUERY_CHARS} characters")]
  TooShort,

  #[error(transparent)]
  Database(#[from] rusqlite::Error),
}

// ─── Folding ─────────────────────────────────────────────────────────────────

/// Per-character Unicode lowercase. Applied character by character (no
/// final-sigma context) so that folding a substring gives a substring of the
/// folded whole.
pub fn fold(text: &str) -> String { text.chars().flat_map(char::to_lowercase).collect() }

/// Register [`fold`] as `vigil_fold(text)` on `conn`. NULL folds to NULL.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
  conn.create_scalar_function(
    FOLD_FUNCTION,
    1,
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
    |ctx| {
      let text: Option<String> = ctx.get(0)?;
      Ok(text.map(|t| fold(&t)))
    },
  )
}

/// A search text in the two forms it is matched in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Needle {
  /// Folded and JSON-escaped, for `payload_json` and `chat_json`.
  pub json:  String,
  /// Folded, for the plain-text summary.
  pub plain: String,
}

impl Needle {
  pub fn new(text: &str) -> Self {
    let plain = fold(text);
    let json = match serde_json::to_string(&plain) {
      // Strip the surrounding quotes of the encoded string.
      Ok(encoded) => encoded[1..encoded.len() - 1].to_owned(),
      Err(_) => plain.clone(),
    };
    Self { json, plain }
  }
}

// ─── Filter clause ───────────────────────────────────────────────────────────

/// A conjunction of SQL conditions with numbered parameters.
#[derive(Debug, Default)]
pub struct Clause {
  conditions: Vec<String>,
  params:     Vec<SqlValue>,
}

impl Clause {
  /// The shared filter conditions; identical for every strategy.
  pub fn for_filter(filter: &EventFilter) -> Self { Self::default().with_filter(filter) }

  /// Append the filter conditions after whatever is already bound.
  pub fn with_filter(mut self, filter: &EventFilter) -> Self {
    if let Some(p) = &filter.producer_id {
      self.push(|i| format!("e.producer_id = ?{i}"), SqlValue::Text(p.clone()));
    }
    if let Some(s) = &filter.stream_id {
      self.push(|i| format!("e.stream_id = ?{i}"), SqlValue::Text(s.clone()));
    }
    if let Some(k) = &filter.event_kind {
      self.push(|i| format!("e.event_kind = ?{i}"), SqlValue::Text(k.clone()));
    }
    if let Some(from) = filter.from {
      self.push(|i| format!("e.created_at >= ?{i}"), SqlValue::Integer(from));
    }
    if let Some(to) = filter.to {
      self.push(|i| format!("e.created_at <= ?{i}"), SqlValue::Integer(to));
    }
    self
  }

  /// Bind a parameter and return its placeholder index.
  fn bind(&mut self, value: SqlValue) -> usize {
    self.params.push(value);
    self.params.len()
  }

  /// Add a condition; `condition` receives the placeholder index to use.
  fn push(&mut self, condition: impl FnOnce(usize) -> String, value: SqlValue) {
    let i = self.bind(value);
    self.conditions.push(condition(i));
  }

  fn where_sql(&self) -> String {
    if self.conditions.is_empty() {
      String::new()
    } else {
      format!("WHERE {}", self.conditions.join(" AND "))
    }
  }
}

/// Run `SELECT <event columns> FROM <from> <clause>` newest first.
pub fn select_events(
  conn: &Connection,
  from: &str,
  mut clause: Clause,
  limit: usize,
) -> rusqlite::Result<Vec<RawEvent>> {
  let where_sql = clause.where_sql();
  let limit_idx = clause.bind(SqlValue::Integer(limit as i64));

  let sql = format!(
    "SELECT {EVENT_COLUMNS}
     FROM {from}
     {where_sql}
     ORDER BY e.created_at DESC, e.id DESC
     LIMIT ?{limit_idx}"
  );

  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(params_from_iter(clause.params.iter()), RawEvent::from_row)?
    .collect()
}

// ─── Strategies ──────────────────────────────────────────────────────────────

pub trait SearchStrategy: Send + Sync {
  fn name(&self) -> &'static str;

  fn search(
    &self,
    conn: &Connection,
    needle: &Needle,
    filter: &EventFilter,
    limit: usize,
  ) -> Result<Vec<RawEvent>, SearchError>;
}

/// FTS5 trigram index lookup.
pub struct IndexSearch;

impl IndexSearch {
  /// Quote `text` as a single FTS5 phrase so operators in user input are
  /// matched literally.
  fn phrase(text: &str) -> String { format!("\"{}\"", text.replace('"', "\"\"")) }

  /// JSON form against payload and chat, plain form against the summary.
  fn match_expr(needle: &Needle) -> String {
    format!(
      "({{payload chat}} : {}) OR (summary : {})",
      Self::phrase(&needle.json),
      Self::phrase(&needle.plain)
    )
  }
}

impl SearchStrategy for IndexSearch {
  fn name(&self) -> &'static str { "index" }

  fn search(
    &self,
    conn: &Connection,
    needle: &Needle,
    filter: &EventFilter,
    limit: usize,
  ) -> Result<Vec<RawEvent>, SearchError> {
    if needle.plain.chars().count() < MIN_INDEX_QUERY_CHARS {
      return Err(SearchError::TooShort);
    }
    let mut clause = Clause::default();
    clause.push(
      |i| format!("events_fts MATCH ?{i}"),
      SqlValue::Text(Self::match_expr(needle)),
    );
    Ok(select_events(
      conn,
      "events e JOIN events_fts ON events_fts.rowid = e.id",
      clause.with_filter(filter),
      limit,
    )?)
  }
}

/// Substring scan over the raw columns.
pub struct ScanSearch;

impl ScanSearch {
  pub fn scan(
    &self,
    conn: &Connection,
    needle: &Needle,
    filter: &EventFilter,
    limit: usize,
  ) -> rusqlite::Result<Vec<RawEvent>> {
    let mut clause = Clause::default();
    let json = clause.bind(SqlValue::Text(needle.json.clone()));
    let plain = clause.bind(SqlValue::Text(needle.plain.clone()));
    clause.conditions.push(format!(
      "(instr({FOLD_FUNCTION}(e.payload_json), ?{json}) > 0
        OR instr({FOLD_FUNCTION}(e.summary), ?{plain}) > 0
        OR instr({FOLD_FUNCTION}(e.chat_json), ?{json}) > 0)"
    ));
    select_events(conn, "events e", clause.with_filter(filter), limit)
  }
}

impl SearchStrategy for ScanSearch {
  fn name(&self) -> &'static str { "scan" }

  fn search(
    &self,
    conn: &Connection,
    needle: &Needle,
    filter: &EventFilter,
    limit: usize,
  ) -> Result<Vec<RawEvent>, SearchError> {
    Ok(self.scan(conn, needle, filter, limit)?)
  }
}

// ─── Index maintenance ───────────────────────────────────────────────────────

/// Add one event's text to the index. Callers run this inside a savepoint of
/// the insert transaction and roll the savepoint back on error.
pub fn index_event(
  conn: &Connection,
  id: i64,
  payload: &str,
  summary: Option<&str>,
  chat: Option<&str>,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO events_fts (rowid, payload, summary, chat) VALUES (?1, ?2, ?3, ?4)",
    params![id, fold(payload), summary.map(fold), chat.map(fold)],
  )?;
  Ok(())
}

// ─── Runtime selector ────────────────────────────────────────────────────────

/// Chooses between the index and the scan at query time.
pub struct SearchEngine {
  primary:  Option<Box<dyn SearchStrategy>>,
  fallback: ScanSearch,
}

impl SearchEngine {
  /// `use_index = false` answers every query with the scan.
  pub fn new(use_index: bool) -> Self {
    let primary: Option<Box<dyn SearchStrategy>> =
      use_index.then(|| Box::new(IndexSearch) as Box<dyn SearchStrategy>);
    Self { primary, fallback: ScanSearch }
  }

  pub fn uses_index(&self) -> bool { self.primary.is_some() }

  pub fn search(
    &self,
    conn: &Connection,
    text: &str,
    filter: &EventFilter,
  ) -> rusqlite::Result<Vec<RawEvent>> {
    let limit = filter.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

    if text.trim().is_empty() {
      return select_events(conn, "events e", Clause::for_filter(filter), limit);
    }

    let needle = Needle::new(text);
    if let Some(primary) = &self.primary {
      match primary.search(conn, &needle, filter, limit) {
        Ok(rows) => return Ok(rows),
        Err(SearchError::TooShort) => {
          tracing::debug!(text, "query too short for the index; scanning");
        }
        Err(error) => {
          tracing::warn!(
            strategy = primary.name(),
            %error,
            "primary search failed; falling back to scan"
          );
        }
      }
    }

    self.fallback.scan(conn, &needle, filter, limit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn phrase_quotes_are_doubled() {
    assert_eq!(IndexSearch::phrase("say \"hi\""), "\"say \"\"hi\"\"\"");
  }

  #[test]
  fn folding_is_unicode_aware() {
    assert_eq!(fold("Échec ΣΟΦΙΑ"), "échec σοφια");
    assert_eq!(fold("ERROR"), "error");
  }

  #[test]
  fn needle_escapes_like_stored_json() {
    let needle = Needle::new("Say \"Hi\"\tnow\\");
    assert_eq!(needle.plain, "say \"hi\"\tnow\\");
    assert_eq!(needle.json, "say \\\"hi\\\"\\tnow\\\\");

    let stored = serde_json::to_string(&serde_json::json!({ "cmd": "Say \"Hi\"\tnow\\" })).unwrap();
    assert!(fold(&stored).contains(&needle.json));
  }

  #[test]
  fn filter_clause_is_conjunctive() {
    let filter = EventFilter {
      producer_id: Some("app".into()),
      event_kind: Some("Stop".into()),
      from: Some(10),
      ..Default::default()
    };
    let clause = Clause::for_filter(&filter);
    assert_eq!(
      clause.where_sql(),
      "WHERE e.producer_id = ?1 AND e.event_kind = ?2 AND e.created_at >= ?3"
    );
  }

  #[test]
  fn filters_after_bound_text_continue_numbering() {
    let filter = EventFilter {
      producer_id: Some("app".into()),
      stream_id: Some("s1".into()),
      to: Some(99),
      ..Default::default()
    };
    let mut clause = Clause::default();
    clause.push(|i| format!("t = ?{i}"), SqlValue::Text("x".into()));
    let clause = clause.with_filter(&filter);
    assert_eq!(
      clause.where_sql(),
      "WHERE t = ?1 AND e.producer_id = ?2 AND e.stream_id = ?3 AND e.created_at <= ?4"
    );
    assert_eq!(clause.params.len(), 4);
  }
}
