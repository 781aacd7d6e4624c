//! Real-time chat channel.
//!
//! Every frame on the wire is a `{type, data}` envelope. The socket loop
//! combines outbound forwarding, inbound handling, and ping/pong keepalive
//! in one select; a connection that misses the pong window is dropped.
//! Chat drives the build-confirmation protocol: free text becomes the
//! session's pending request (answered with a plan preview), and a
//! confirmation phrase with a known brand launches the orchestrator.

use crate::engine::RunStatus;
use crate::request::{is_build_confirmation, translate_user_text};
use crate::server::AppState;
use crate::server::session::{ChatEntry, ConnectionHandle};
use axum::{
    body::Bytes,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── envelope ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsEnvelope {
    Ping,
    Pong,
    Chat {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        brand: Option<String>,
    },
    Error {
        message: String,
    },
    BuildStarted {
        brand: String,
        objective: String,
    },
    BuildCompleted {
        run_id: String,
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
    },
}

impl WsEnvelope {
    pub fn chat(content: impl Into<String>) -> Self {
        WsEnvelope::Chat {
            content: content.into(),
            brand: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WsEnvelope::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","data":{"message":"serialization failure"}}"#.to_string()
        })
    }
}

// ── handler ──

pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let (mut sender, receiver) = socket.split();

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = match state.registry.admit(&session_id, tx).await {
        Ok(handle) => handle,
        Err(e) => {
            let _ = sender
                .send(Message::Text(WsEnvelope::error(e.to_string()).to_json().into()))
                .await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    tracing::debug!(session = %session_id, connection = %handle.connection_id, "chat connection opened");
    run_socket_loop(sender, receiver, rx, &handle, state.clone()).await;

    state.registry.close_connection(&handle).await;
    state
        .message_limiter
        .forget(&handle.connection_id.to_string())
        .await;
    tracing::debug!(session = %session_id, connection = %handle.connection_id, "chat connection closed");
}

/// Core socket loop with ping/pong keepalive.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: mpsc::UnboundedReceiver<WsEnvelope>,
    handle: &ConnectionHandle,
    state: Arc<AppState>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            outbound = rx.recv() => {
                match outbound {
                    Some(envelope) => {
                        if sender.send(Message::Text(envelope.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    // Session evicted: the registry dropped our sender.
                    None => break,
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_text(text.as_str(), handle, &state).await;
                        if let Some(envelope) = reply {
                            if sender.send(Message::Text(envelope.to_json().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Handle one inbound envelope; the return value is sent only to the
/// originating connection (broadcasts go through the registry).
async fn handle_text(
    text: &str,
    handle: &ConnectionHandle,
    state: &Arc<AppState>,
) -> Option<WsEnvelope> {
    let envelope: WsEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(_) => return Some(WsEnvelope::error("unrecognized message envelope")),
    };

    state.registry.touch(&handle.session_id).await;

    match envelope {
        WsEnvelope::Ping => Some(WsEnvelope::Pong),
        WsEnvelope::Chat { content, brand } => {
            let key = handle.connection_id.to_string();
            if !state.message_limiter.check(&key).await {
                return Some(WsEnvelope::error("rate limit exceeded, slow down"));
            }
            handle_chat(content, brand, handle, state).await;
            None
        }
        // Clients only ever send ping/chat; anything else is a protocol error.
        _ => Some(WsEnvelope::error("unexpected message type")),
    }
}

async fn handle_chat(
    content: String,
    brand: Option<String>,
    handle: &ConnectionHandle,
    state: &Arc<AppState>,
) {
    let session_id = &handle.session_id;
    let Some(session) = state.registry.get(session_id).await else {
        return;
    };
    session.set_brand(brand).await;
    state
        .registry
        .record(session_id, ChatEntry::new("user", content.clone()))
        .await;

    if is_build_confirmation(&content, &state.config.intent) {
        let Some(brand) = session.brand().await else {
            state
                .registry
                .broadcast(session_id, WsEnvelope::error("no brand selected for this session"))
                .await;
            return;
        };
        let Some(pending) = session.pending_build().await else {
            state
                .registry
                .broadcast(session_id, WsEnvelope::error("nothing pending to build"))
                .await;
            return;
        };
        session.set_pending_build(None).await;
        spawn_build(state.clone(), session_id.clone(), brand, pending);
        return;
    }

    // Plain chat: remember it as the pending request and answer with the
    // plan the resolver would execute.
    session.set_pending_build(Some(content.clone())).await;
    let (request, _) = translate_user_text(
        session.brand().await.as_deref().unwrap_or("unknown"),
        &content,
        &state.config.intent,
        1,
    );
    let plan = state.orchestrator.preview_plan(&request).await;
    let mut preview = String::from("Plan: ");
    let described: Vec<String> = plan
        .steps
        .iter()
        .map(|s| {
            format!(
                "{} {} ({})",
                s.kind,
                if s.will_run { "✓" } else { "✗" },
                s.reason
            )
        })
        .collect();
    preview.push_str(&described.join(", "));
    preview.push_str(". Responde 'ok' o '/build' para generar.");

    state
        .registry
        .record(session_id, ChatEntry::new("assistant", preview.clone()))
        .await;
    state
        .registry
        .broadcast(session_id, WsEnvelope::chat(preview))
        .await;
}

/// Launch a campaign run in the background, streaming lifecycle events to
/// every connection of the session.
fn spawn_build(state: Arc<AppState>, session_id: String, brand: String, text: String) {
    tokio::spawn(async move {
        let (request, translation) = translate_user_text(&brand, &text, &state.config.intent, 1);
        state
            .registry
            .broadcast(
                &session_id,
                WsEnvelope::BuildStarted {
                    brand: brand.clone(),
                    objective: request.objective.clone(),
                },
            )
            .await;

        match state
            .orchestrator
            .run_translated_campaign(request, translation)
            .await
        {
            Ok(result) => {
                state
                    .registry
                    .record(
                        &session_id,
                        ChatEntry::new("assistant", format!("build {} finished", result.run_id)),
                    )
                    .await;
                state
                    .registry
                    .broadcast(
                        &session_id,
                        WsEnvelope::BuildCompleted {
                            run_id: result.run_id,
                            status: result.status,
                            artifact: result
                                .artifact_ref
                                .map(|p| p.to_string_lossy().into_owned()),
                        },
                    )
                    .await;
            }
            Err(e) => {
                tracing::error!(error = %e, "campaign build failed to run");
                state
                    .registry
                    .broadcast(&session_id, WsEnvelope::error(format!("build failed: {e}")))
                    .await;
            }
        }
    });
}
