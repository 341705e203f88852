//! vigil-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered with
//! `VIGIL_*` environment variables, opens the SQLite store, and serves the
//! collector API until SIGINT or SIGTERM.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vigil_server::{ServerConfig, app, build_collector, expand_tilde, spawn_sweeper};
use vigil_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Vigil telemetry collector")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let config = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store_path = expand_tilde(&config.store_path);
  if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create store directory {parent:?}"))?;
  }

  let store = SqliteStore::open_with(&store_path, config.store_options())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let collector = build_collector(store, &config);
  let sweeper = spawn_sweeper(collector.clone(), config.sweep_interval());

  let address = config.address();
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;
  tracing::info!(
    store = %store_path.display(),
    search_index = config.search_index,
    "listening on http://{address}"
  );

  axum::serve(listener, app(collector))
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  sweeper.abort();
  tracing::info!("vigil server shut down");
  Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(error) = tokio::signal::ctrl_c().await {
      tracing::error!(%error, "failed to listen for Ctrl+C");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(error) => {
        tracing::error!(%error, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
    () = terminate => tracing::info!("received SIGTERM, shutting down"),
  }
}
