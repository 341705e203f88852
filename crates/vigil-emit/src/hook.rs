//! Turning an agent hook payload into a [`NewEvent`].

use std::{fs, path::Path};

use serde_json::{Map, Value, json};
use vigil_core::event::NewEvent;

/// Stream id used when neither the caller nor the payload names a session.
pub const UNKNOWN_STREAM: &str = "unknown";

#[derive(Debug, Clone, Default)]
pub struct HookOptions {
  pub producer:      String,
  pub event_kind:    String,
  /// Overrides the payload's `session_id`.
  pub stream_id:     Option<String>,
  pub summary:       Option<String>,
  /// Overrides the model found in the transcript.
  pub model:         Option<String>,
  /// Attach the transcript named by the payload's `transcript_path`.
  pub add_chat:      bool,
  pub agent_type:    String,
  pub agent_version: Option<String>,
}

pub fn build_event(payload: Value, opts: &HookOptions) -> NewEvent {
  let stream_id = opts
    .stream_id
    .clone()
    .filter(|s| !s.trim().is_empty())
    .or_else(|| payload_str(&payload, "session_id"))
    .unwrap_or_else(|| UNKNOWN_STREAM.to_owned());

  let transcript = if opts.add_chat || opts.model.is_none() {
    payload_str(&payload, "transcript_path").and_then(|p| read_transcript(Path::new(&p)))
  } else {
    None
  };

  let model_name = opts
    .model
    .clone()
    .or_else(|| transcript.as_deref().and_then(model_from_transcript));
  let chat = if opts.add_chat { transcript } else { None };

  let mut agent = Map::new();
  agent.insert("type".into(), Value::String(opts.agent_type.clone()));
  if let Some(version) = &opts.agent_version {
    agent.insert("version".into(), Value::String(version.clone()));
  }

  let mut event = NewEvent::new(opts.producer.clone(), stream_id, opts.event_kind.clone(), payload);
  event.summary = opts.summary.clone();
  event.model_name = model_name;
  event.chat = chat;
  event.metadata = Some(json!({ "agent": agent }));
  event
}

fn payload_str(payload: &Value, key: &str) -> Option<String> {
  payload
    .get(key)
    .and_then(Value::as_str)
    .filter(|s| !s.trim().is_empty())
    .map(str::to_owned)
}

/// One value per parsable line. An unreadable file is logged and treated as
/// absent.
pub fn read_transcript(path: &Path) -> Option<Vec<Value>> {
  let contents = match fs::read_to_string(path) {
    Ok(c) => c,
    Err(error) => {
      tracing::warn!(path = %path.display(), %error, "could not read transcript");
      return None;
    }
  };
  Some(
    contents
      .lines()
      .filter(|l| !l.trim().is_empty())
      .filter_map(|l| serde_json::from_str(l).ok())
      .collect(),
  )
}

/// `message.model` of the most recent assistant entry.
pub fn model_from_transcript(entries: &[Value]) -> Option<String> {
  entries
    .iter()
    .rev()
    .filter(|e| e.get("type").and_then(Value::as_str) == Some("assistant"))
    .find_map(|e| e.pointer("/message/model").and_then(Value::as_str))
    .map(str::to_owned)
}
