//! SQL schema for the Vigil SQLite store.
//!
//! The schema only ever grows. Each migration is additive (new tables, new
//! nullable columns, new virtual tables) and is applied once, gated on
//! `PRAGMA user_version`. Rows written under an older version read the newer
//! columns back as NULL. The only table ever rebuilt is `events_fts`, which
//! holds nothing but derived data.

use rusqlite::Connection;

use crate::search;

/// Connection-level settings; run on every open, outside any transaction.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

pub struct Migration {
  pub version: i32,
  pub sql:     &'static str,
}

/// All migrations in order. New migrations are appended here.
pub const MIGRATIONS: &[Migration] = &[
  Migration {
    version: 1,
    sql:     "
-- Events are append-only; only the decision columns (v2) are ever updated.
CREATE TABLE IF NOT EXISTS events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    producer_id  TEXT    NOT NULL,
    stream_id    TEXT    NOT NULL,
    event_kind   TEXT    NOT NULL,
    payload_json TEXT    NOT NULL,
    summary      TEXT,
    chat_json    TEXT,
    created_at   INTEGER NOT NULL   -- ms since epoch; collector-assigned
);

CREATE INDEX IF NOT EXISTS events_created_idx  ON events(created_at);
CREATE INDEX IF NOT EXISTS events_producer_idx ON events(producer_id);
CREATE INDEX IF NOT EXISTS events_stream_idx   ON events(stream_id);
CREATE INDEX IF NOT EXISTS events_kind_idx     ON events(event_kind);
",
  },
  Migration {
    version: 2,
    sql:     "
ALTER TABLE events ADD COLUMN human_request_json TEXT;
ALTER TABLE events ADD COLUMN decision_json      TEXT;
ALTER TABLE events ADD COLUMN resolved_at        INTEGER;
",
  },
  Migration {
    version: 3,
    sql:     "
ALTER TABLE events ADD COLUMN model_name            TEXT;
ALTER TABLE events ADD COLUMN metadata_json         TEXT;
ALTER TABLE events ADD COLUMN input_tokens          INTEGER;
ALTER TABLE events ADD COLUMN output_tokens         INTEGER;
ALTER TABLE events ADD COLUMN cache_creation_tokens INTEGER;
ALTER TABLE events ADD COLUMN cache_read_tokens     INTEGER;
ALTER TABLE events ADD COLUMN cost_usd              REAL;
",
  },
  Migration {
    version: 4,
    sql:     "
-- Standalone index keyed by events.id; maintained by the store, not triggers,
-- so a broken index never blocks an insert.
CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
    payload, summary, chat,
    tokenize = 'trigram'
);

INSERT INTO events_fts (rowid, payload, summary, chat)
    SELECT id, payload_json, summary, chat_json FROM events;
",
  },
  Migration {
    version: 5,
    sql:     "
-- Case-sensitive index over vigil_fold()ed text, matched like the scan.
DROP TABLE IF EXISTS events_fts;

CREATE VIRTUAL TABLE events_fts USING fts5(
    payload, summary, chat,
    tokenize = 'trigram case_sensitive 1'
);

INSERT INTO events_fts (rowid, payload, summary, chat)
    SELECT id, vigil_fold(payload_json), vigil_fold(summary), vigil_fold(chat_json)
    FROM events;
",
  },
];

pub const LATEST_VERSION: i32 = 5;

pub fn user_version(conn: &Connection) -> rusqlite::Result<i32> {
  conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Apply every migration newer than the database's `user_version`.
///
/// Each migration runs in its own transaction together with the version bump.
/// Returns the number of migrations applied.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<usize> {
  migrate_to(conn, LATEST_VERSION)
}

pub(crate) fn migrate_to(conn: &mut Connection, target: i32) -> rusqlite::Result<usize> {
  conn.execute_batch(PRAGMAS)?;
  search::register_functions(conn)?;

  let current = user_version(conn)?;
  let mut applied = 0;

  for migration in MIGRATIONS
    .iter()
    .filter(|m| m.version > current && m.version <= target)
  {
    tracing::info!(version = migration.version, "applying schema migration");
    let tx = conn.transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.pragma_update(None, "user_version", migration.version)?;
    tx.commit()?;
    applied += 1;
  }

  Ok(applied)
}
