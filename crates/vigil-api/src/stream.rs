//! `GET /stream`: the WebSocket observer stream.
//!
//! The first message is `{"type":"initial","data":[...]}` with the recent
//! window, oldest first; every later message is `{"type":"event","data":{...}}`.
//! Messages from the client are ignored apart from close.

use std::sync::Arc;

use axum::{
  extract::{
    State, WebSocketUpgrade,
    ws::{Message as AxumMessage, WebSocket},
  },
  response::Response,
};
use futures_util::{SinkExt as _, StreamExt as _};
use vigil_core::store::EventStore;

use crate::collector::Collector;

pub async fn handler<S: EventStore + 'static>(
  State(collector): State<Arc<Collector<S>>>,
  ws: WebSocketUpgrade,
) -> Response {
  ws.on_upgrade(move |socket| observe(socket, collector))
}

async fn observe<S: EventStore>(socket: WebSocket, collector: Arc<Collector<S>>) {
  let mut subscription = match collector.subscribe().await {
    Ok(s) => s,
    Err(error) => {
      tracing::warn!(%error, "failed to bootstrap observer");
      return;
    }
  };
  let id = subscription.id();
  tracing::info!(observer = id, "observer connected");

  let (mut sender, mut receiver) = socket.split();

  loop {
    tokio::select! {
      message = subscription.recv() => {
        let Some(text) = message else {
          // Dropped by the hub for falling behind.
          break;
        };
        if sender.send(AxumMessage::Text(text.to_string().into())).await.is_err() {
          break;
        }
      }
      incoming = receiver.next() => match incoming {
        Some(Ok(AxumMessage::Close(_)) | Err(_)) | None => break,
        Some(Ok(_)) => {}
      },
    }
  }

  subscription.unregister();
  tracing::info!(observer = id, "observer disconnected");
}
