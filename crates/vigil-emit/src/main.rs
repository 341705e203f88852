//! vigil-emit binary.
//!
//! Reads one hook payload as JSON from stdin and submits it. Exits 0 whatever
//! happens so a collector outage never blocks the agent; diagnostics go to
//! stderr and stdout stays empty.

use std::{io::Read as _, path::PathBuf};

use anyhow::Context as _;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vigil_emit::{
  Emitter, EmitterConfig, HookOptions, SubmitOutcome, build_event,
  config::{DEFAULT_SERVER_URL, default_queue_dir},
};

#[derive(Parser)]
#[command(author, version, about = "Send an agent hook event to a Vigil collector")]
struct Cli {
  /// Emitting application, usually the project name.
  #[arg(long, env = "VIGIL_PRODUCER")]
  producer:      String,
  /// Lifecycle phase, e.g. PreToolUse.
  #[arg(long, env = "VIGIL_EVENT_KIND")]
  event_kind:    String,
  /// Defaults to the payload's session_id.
  #[arg(long, env = "VIGIL_STREAM_ID")]
  stream_id:     Option<String>,
  #[arg(long, env = "VIGIL_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
  server_url:    String,
  /// Defaults to $CLAUDE_PROJECT_DIR/.vigil, else ./.vigil.
  #[arg(long, env = "VIGIL_QUEUE_DIR")]
  queue_dir:     Option<PathBuf>,
  #[arg(long, env = "VIGIL_SUMMARY")]
  summary:       Option<String>,
  /// Attach the transcript named by the payload's transcript_path.
  #[arg(long, env = "VIGIL_ADD_CHAT")]
  add_chat:      bool,
  /// Defaults to the model of the transcript's latest assistant message.
  #[arg(long, env = "VIGIL_MODEL")]
  model:         Option<String>,
  #[arg(long, env = "VIGIL_AGENT_TYPE", default_value = "claude")]
  agent_type:    String,
  #[arg(long, env = "VIGIL_AGENT_VERSION")]
  agent_version: Option<String>,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(e) => {
      eprintln!("{e}");
      return;
    }
  };

  if let Err(error) = run(cli).await {
    tracing::error!("{error:#}");
  }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
  let mut input = String::new();
  std::io::stdin()
    .read_to_string(&mut input)
    .context("failed to read hook payload from stdin")?;
  let payload: serde_json::Value =
    serde_json::from_str(&input).context("hook payload is not valid JSON")?;

  let queue_dir = cli.queue_dir.clone().unwrap_or_else(default_queue_dir);
  let config = EmitterConfig::new(cli.server_url.clone(), &queue_dir, &cli.producer);
  let emitter = Emitter::new(config).context("failed to build HTTP client")?;

  let options = HookOptions {
    producer:      cli.producer,
    event_kind:    cli.event_kind,
    stream_id:     cli.stream_id,
    summary:       cli.summary,
    model:         cli.model,
    add_chat:      cli.add_chat,
    agent_type:    cli.agent_type,
    agent_version: cli.agent_version,
  };
  let event = build_event(payload, &options);

  match emitter.submit(&event).await {
    SubmitOutcome::Delivered(stored) => tracing::debug!(id = stored.id, "event delivered"),
    SubmitOutcome::Queued => {
      tracing::info!(queue = %emitter.queue().path().display(), "event queued for later delivery")
    }
    SubmitOutcome::Rejected(reason) => tracing::warn!(%reason, "event rejected"),
    SubmitOutcome::Lost => tracing::warn!("event could not be delivered or queued"),
  }
  Ok(())
}
