//! [`SqliteStore`], the SQLite implementation of [`EventStore`].

use std::{path::Path, sync::Arc};

use rusqlite::{OptionalExtension as _, params};

use vigil_core::{
  cost,
  decision::Decision,
  event::{Event, NewEvent},
  store::{DEFAULT_QUERY_LIMIT, EventFilter, EventStore, FilterOptions},
};

use crate::{
  Result,
  encode::{EVENT_COLUMNS, RawEvent, encode_json, encode_json_opt, into_events},
  schema,
  search::{self, Clause, SearchEngine},
};

/// Tunables that change how the store answers queries, not what it stores.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
  /// Answer text queries from the FTS5 index. When `false` every search is a
  /// substring scan. The index is written either way.
  pub search_index: bool,
}

impl Default for StoreOptions {
  fn default() -> Self { Self { search_index: true } }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Vigil event store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:   tokio_rusqlite::Connection,
  search: Arc<SearchEngine>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and bring its schema up to date.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path, StoreOptions::default()).await
  }

  pub async fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, options).await
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    Self::open_in_memory_with(StoreOptions::default()).await
  }

  pub async fn open_in_memory_with(options: StoreOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, options).await
  }

  async fn init(conn: tokio_rusqlite::Connection, options: StoreOptions) -> Result<Self> {
    let applied = conn
      .call(|conn| Ok(schema::migrate(conn)?))
      .await?;
    if applied > 0 {
      tracing::info!(applied, version = schema::LATEST_VERSION, "store schema migrated");
    }
    let search = SearchEngine::new(options.search_index);
    tracing::debug!(search_index = search.uses_index(), "store opened");
    Ok(Self { conn, search: Arc::new(search) })
  }

  /// Run `f` against the raw connection. Only for tests that need to damage
  /// or inspect the database directly.
  #[cfg(test)]
  pub(crate) async fn with_connection<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
    R: Send + 'static,
  {
    Ok(self.conn.call(move |conn| Ok(f(conn)?)).await?)
  }
}

fn select_by_id(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<RawEvent>> {
  conn
    .query_row(
      &format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = ?1"),
      params![id],
      RawEvent::from_row,
    )
    .optional()
}

fn distinct(conn: &rusqlite::Connection, column: &str) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT DISTINCT {column} FROM events ORDER BY {column}"
  ))?;
  stmt.query_map([], |r| r.get(0))?.collect()
}

/// Token counts beyond `i64::MAX` cannot be stored; saturate rather than fail.
fn count(n: u64) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }

// ─── EventStore impl ─────────────────────────────────────────────────────────

impl EventStore for SqliteStore {
  type Error = crate::Error;

  async fn insert(&self, event: NewEvent) -> Result<Event> {
    event.validate()?;

    let derived = cost::derive(&event);
    let payload_json = encode_json("payload_json", &event.payload)?;
    let chat_json = encode_json_opt("chat_json", event.chat.as_ref())?;
    let metadata_json = encode_json_opt("metadata_json", event.metadata.as_ref())?;
    let request_json = encode_json_opt("human_request_json", event.human_request.as_ref())?;
    let now = vigil_core::now_ms();

    let NewEvent { producer_id, stream_id, event_kind, summary, model_name, .. } = event;
    let usage = derived.usage;
    let cost_usd = derived.cost_usd;

    let raw = self
      .conn
      .call(move |conn| {
        let mut tx = conn.transaction()?;

        let last: Option<i64> =
          tx.query_row("SELECT MAX(created_at) FROM events", [], |r| r.get(0))?;
        let created_at = last.map_or(now, |last| last.max(now));

        tx.execute(
          "INSERT INTO events (
             producer_id, stream_id, event_kind, payload_json, summary, chat_json,
             created_at, human_request_json, model_name, metadata_json,
             input_tokens, output_tokens, cache_creation_tokens, cache_read_tokens,
             cost_usd
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
          params![
            producer_id,
            stream_id,
            event_kind,
            payload_json,
            summary,
            chat_json,
            created_at,
            request_json,
            model_name,
            metadata_json,
            usage.map(|u| count(u.input_tokens)),
            usage.map(|u| count(u.output_tokens)),
            usage.map(|u| count(u.cache_creation_tokens)),
            usage.map(|u| count(u.cache_read_tokens)),
            cost_usd,
          ],
        )?;
        let id = tx.last_insert_rowid();

        {
          // Dropping an uncommitted savepoint rolls back just the index write.
          let sp = tx.savepoint()?;
          match search::index_event(&sp, id, &payload_json, summary.as_deref(), chat_json.as_deref())
          {
            Ok(()) => sp.commit()?,
            Err(error) => {
              tracing::warn!(id, %error, "failed to index event; search will scan");
            }
          }
        }

        let raw = select_by_id(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.into_event()
  }

  async fn get(&self, id: i64) -> Result<Option<Event>> {
    let raw = self.conn.call(move |conn| Ok(select_by_id(conn, id)?)).await?;
    raw.map(RawEvent::into_event).transpose()
  }

  async fn recent(&self, limit: usize) -> Result<Vec<Event>> {
    let raws = self
      .conn
      .call(move |conn| Ok(search::select_events(conn, "events e", Clause::default(), limit)?))
      .await?;
    into_events(raws)
  }

  async fn query<'a>(&'a self, filter: &'a EventFilter) -> Result<Vec<Event>> {
    let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    let clause = Clause::for_filter(filter);
    let raws = self
      .conn
      .call(move |conn| Ok(search::select_events(conn, "events e", clause, limit)?))
      .await?;
    into_events(raws)
  }

  async fn search<'a>(&'a self, text: &'a str, filter: &'a EventFilter) -> Result<Vec<Event>> {
    let engine = Arc::clone(&self.search);
    let text = text.to_owned();
    let filter = filter.clone();
    let raws = self
      .conn
      .call(move |conn| Ok(engine.search(conn, &text, &filter)?))
      .await?;
    into_events(raws)
  }

  async fn update_human_decision(&self, id: i64, decision: Decision) -> Result<Option<Event>> {
    decision.validate()?;
    let decision_json = encode_json("decision_json", &decision)?;
    let now = vigil_core::now_ms();

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE events
           SET decision_json = ?1, resolved_at = MAX(?2, created_at)
           WHERE id = ?3",
          params![decision_json, now, id],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        let raw = select_by_id(&tx, id)?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.map(RawEvent::into_event).transpose()
  }

  async fn filter_options(&self) -> Result<FilterOptions> {
    let options = self
      .conn
      .call(|conn| {
        Ok(FilterOptions {
          producer_ids: distinct(conn, "producer_id")?,
          stream_ids:   distinct(conn, "stream_id")?,
          event_kinds:  distinct(conn, "event_kind")?,
        })
      })
      .await?;
    Ok(options)
  }
}
