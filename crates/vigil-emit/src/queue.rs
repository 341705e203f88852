//! The durable delivery queue: one JSON [`QueueEntry`] per line.
//!
//! Appends go straight to the end of the file. Rewrites go through a
//! temporary sibling and a rename, so a crash mid-rewrite leaves either the
//! old queue or the new one, never a truncated file. An empty queue has no
//! file at all.

use std::{
  fs::{self, OpenOptions},
  io::{self, Write as _},
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_core::event::NewEvent;

#[derive(Debug, Error)]
pub enum QueueError {
  #[error("queue file {path:?}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to encode queue entry: {0}")]
  Encode(#[from] serde_json::Error),
}

/// An event that could not be delivered yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
  pub event:     NewEvent,
  /// Delivery attempts made so far, including the ones before queueing.
  pub attempts:  u32,
  /// Milliseconds since the Unix epoch.
  pub queued_at: i64,
}

impl QueueEntry {
  pub fn new(event: NewEvent, attempts: u32) -> Self {
    Self { event, attempts, queued_at: vigil_core::now_ms() }
  }
}

#[derive(Debug, Clone)]
pub struct DeliveryQueue {
  path: PathBuf,
}

impl DeliveryQueue {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

  pub fn path(&self) -> &Path { &self.path }

  fn io_error(&self, source: io::Error) -> QueueError {
    QueueError::Io { path: self.path.clone(), source }
  }

  fn ensure_dir(&self) -> Result<(), QueueError> {
    match self.path.parent() {
      Some(dir) if !dir.as_os_str().is_empty() => {
        fs::create_dir_all(dir).map_err(|e| self.io_error(e))
      }
      _ => Ok(()),
    }
  }

  /// Add `entry` at the back of the queue.
  pub fn append(&self, entry: &QueueEntry) -> Result<(), QueueError> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    self.ensure_dir()?;
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .map_err(|e| self.io_error(e))?;
    file.write_all(line.as_bytes()).map_err(|e| self.io_error(e))
  }

  /// Every entry, oldest first. A missing file is an empty queue; lines that
  /// do not parse are skipped with a warning.
  pub fn load(&self) -> Result<Vec<QueueEntry>, QueueError> {
    let contents = match fs::read_to_string(&self.path) {
      Ok(c) => c,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(self.io_error(e)),
    };

    let entries = contents
      .lines()
      .enumerate()
      .filter(|(_, line)| !line.trim().is_empty())
      .filter_map(|(n, line)| match serde_json::from_str(line) {
        Ok(entry) => Some(entry),
        Err(error) => {
          tracing::warn!(path = %self.path.display(), line = n + 1, %error, "skipping unreadable queue entry");
          None
        }
      })
      .collect();
    Ok(entries)
  }

  /// Replace the queue's contents with `entries`; an empty slice removes the
  /// file.
  pub fn rewrite(&self, entries: &[QueueEntry]) -> Result<(), QueueError> {
    if entries.is_empty() {
      return match fs::remove_file(&self.path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(self.io_error(e)),
      };
    }

    let mut contents = String::new();
    for entry in entries {
      contents.push_str(&serde_json::to_string(entry)?);
      contents.push('\n');
    }

    self.ensure_dir()?;
    let tmp = self.path.with_extension("jsonl.tmp");
    fs::write(&tmp, contents).map_err(|e| self.io_error(e))?;
    fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
  }

  pub fn len(&self) -> Result<usize, QueueError> { Ok(self.load()?.len()) }

  pub fn is_empty(&self) -> Result<bool, QueueError> { Ok(self.len()? == 0) }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn entry(n: i64) -> QueueEntry {
    QueueEntry::new(NewEvent::new("app", "s1", "Stop", json!({ "n": n })), 1)
  }

  fn queue(dir: &tempfile::TempDir) -> DeliveryQueue {
    DeliveryQueue::new(dir.path().join("nested").join("queue-app.jsonl"))
  }

  #[test]
  fn missing_file_is_an_empty_queue() {
    let dir = tempfile::tempdir().unwrap();
    let q = queue(&dir);
    assert!(q.load().unwrap().is_empty());
    assert!(q.is_empty().unwrap());
  }

  #[test]
  fn append_preserves_order() {
    let dir = tempfile::tempdir().unwrap();
    let q = queue(&dir);
    for n in 0..3 {
      q.append(&entry(n)).unwrap();
    }
    let loaded = q.load().unwrap();
    let ns: Vec<_> = loaded.iter().map(|e| e.event.payload["n"].clone()).collect();
    assert_eq!(ns, vec![json!(0), json!(1), json!(2)]);
  }

  #[test]
  fn unreadable_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let q = queue(&dir);
    q.append(&entry(1)).unwrap();
    let mut file = OpenOptions::new().append(true).open(q.path()).unwrap();
    writeln!(file, "{{not json").unwrap();
    drop(file);
    q.append(&entry(2)).unwrap();

    assert_eq!(q.len().unwrap(), 2);
  }

  #[test]
  fn rewrite_replaces_and_empty_removes() {
    let dir = tempfile::tempdir().unwrap();
    let q = queue(&dir);
    for n in 0..3 {
      q.append(&entry(n)).unwrap();
    }

    let mut kept = q.load().unwrap();
    kept.remove(0);
    kept[0].attempts += 1;
    q.rewrite(&kept).unwrap();
    assert_eq!(q.load().unwrap(), kept);
    assert!(!q.path().with_extension("jsonl.tmp").exists());

    q.rewrite(&[]).unwrap();
    assert!(!q.path().exists());
    q.rewrite(&[]).unwrap();
  }

  #[test]
  fn unwritable_location_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "").unwrap();
    let q = DeliveryQueue::new(blocker.join("queue.jsonl"));
    assert!(matches!(q.append(&entry(1)), Err(QueueError::Io { .. })));
  }
}
