//! Emitter settings.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:4000";
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Name of the queue directory inside a project.
pub const QUEUE_DIR_NAME: &str = ".vigil";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitterConfig {
  /// Collector base URL. A URL already ending in `/events` is used as is.
  pub server_url:      String,
  /// The producer's JSON-lines queue file.
  pub queue_path:      PathBuf,
  /// Per-attempt HTTP timeout.
  pub attempt_timeout: Duration,
  pub max_attempts:    u32,
  /// Backoff before retry `n` (0-based) is `base_delay * 2^n`.
  pub base_delay:      Duration,
}

impl EmitterConfig {
  /// Defaults for `producer`, queueing under `queue_dir`.
  pub fn new(server_url: impl Into<String>, queue_dir: &Path, producer: &str) -> Self {
    Self {
      server_url:      server_url.into(),
      queue_path:      queue_dir.join(queue_file_name(producer)),
      attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
      max_attempts:    DEFAULT_MAX_ATTEMPTS,
      base_delay:      DEFAULT_BASE_DELAY,
    }
  }

  pub fn events_url(&self) -> String {
    let base = self.server_url.trim_end_matches('/');
    if base.ends_with("/events") {
      base.to_owned()
    } else {
      format!("{base}/events")
    }
  }

  pub fn backoff(&self, retry: u32) -> Duration {
    self.base_delay.saturating_mul(2u32.saturating_pow(retry))
  }
}

/// `queue-<producer>.jsonl`, with anything but ASCII alphanumerics, `-` and
/// `_` replaced so a producer id can never escape the queue directory.
pub fn queue_file_name(producer: &str) -> String {
  let safe: String = producer
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
    .collect();
  format!("queue-{safe}.jsonl")
}

/// `$CLAUDE_PROJECT_DIR/.vigil`, else `<cwd>/.vigil`.
pub fn default_queue_dir() -> PathBuf {
  let project = std::env::var_os("CLAUDE_PROJECT_DIR")
    .map(PathBuf::from)
    .or_else(|| std::env::current_dir().ok())
    .unwrap_or_else(|| PathBuf::from("."));
  project.join(QUEUE_DIR_NAME)
}
