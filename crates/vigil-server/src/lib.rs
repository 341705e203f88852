//! Vigil collector server: configuration and application assembly.
//!
//! The binary in `main.rs` only parses flags, initialises tracing and wires
//! these pieces together, so everything here can be exercised from tests.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use axum::Router;
use serde::Deserialize;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use vigil_api::{Collector, CollectorConfig, HitlRegistry, WebSocketTransport};
use vigil_core::store::EventStore;
use vigil_store_sqlite::StoreOptions;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Server configuration, loaded from `config.toml` and `VIGIL_*` environment
/// variables. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  /// SQLite database file; a leading `~/` is expanded.
  pub store_path:          PathBuf,
  /// Events sent to a new observer before its live stream.
  pub recent_window:       usize,
  /// Default and maximum search result count.
  pub search_limit:        usize,
  /// Answer searches from the FTS5 index (falls back to a scan on error).
  pub search_index:        bool,
  pub delivery_timeout_ms: u64,
  /// How long a decision request is remembered when it sets no timeout.
  pub request_ttl_secs:    u64,
  pub sweep_interval_secs: u64,
  /// Largest accepted event body, in bytes.
  pub max_event_bytes:     usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                "127.0.0.1".into(),
      port:                4000,
      store_path:          PathBuf::from("vigil.db"),
      recent_window:       300,
      search_limit:        500,
      search_index:        true,
      delivery_timeout_ms: 5_000,
      request_ttl_secs:    3_600,
      sweep_interval_secs: 60,
      max_event_bytes:     vigil_api::DEFAULT_MAX_EVENT_BYTES,
    }
  }
}

impl ServerConfig {
  /// Layer `path` (optional) and `VIGIL_*` environment variables over the
  /// defaults.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("VIGIL").try_parsing(true))
      .build()?
      .try_deserialize()
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn store_options(&self) -> StoreOptions { StoreOptions { search_index: self.search_index } }

  pub fn collector_config(&self) -> CollectorConfig {
    CollectorConfig {
      recent_window:   self.recent_window,
      search_limit:    self.search_limit,
      max_event_bytes: self.max_event_bytes,
    }
  }

  pub fn sweep_interval(&self) -> Duration { Duration::from_secs(self.sweep_interval_secs.max(1)) }
}

// ─── Assembly ────────────────────────────────────────────────────────────────

/// A collector that pushes decisions over WebSocket.
pub fn build_collector<S: EventStore>(store: S, config: &ServerConfig) -> Arc<Collector<S>> {
  let registry = HitlRegistry::new(Arc::new(WebSocketTransport))
    .with_delivery_timeout(Duration::from_millis(config.delivery_timeout_ms))
    .with_request_ttl(Duration::from_secs(config.request_ttl_secs));
  Arc::new(Collector::new(store, registry, config.collector_config()))
}

/// The API router with request tracing and permissive CORS for dashboards.
pub fn app<S: EventStore + 'static>(collector: Arc<Collector<S>>) -> Router {
  vigil_api::router(collector)
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
}

/// Periodically drop decision requests whose agents have stopped waiting.
pub fn spawn_sweeper<S: EventStore + 'static>(
  collector: Arc<Collector<S>>,
  every: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      let swept = collector.hitl().sweep_expired(vigil_core::now_ms());
      if swept > 0 {
        tracing::info!(swept, pending = collector.hitl().pending_count(), "expired decision requests dropped");
      }
    }
  })
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
