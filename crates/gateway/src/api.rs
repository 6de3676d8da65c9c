//! Chorus endpoints: one-shot HTTP and streaming WebSocket.
//!
//! WebSocket protocol (every frame is `{ "type": ..., "data": { ... } }`):
//! - Client → Server: `submit_prompt` with `{ "thread_id", "prompt" }`
//!   (`content` is accepted for `prompt`)
//! - Server → Client: one frame per effect, in emission order. Stage outputs
//!   are `chorus_response` frames carrying `{ step, content, priors }`, plus
//!   `loop` and `reasoning` for Update; other effects keep their type name.
//! - Malformed or unknown messages get an `error` frame with `{ kind, message }`
//!
//! `POST /v1/chorus` returns the bare effect list instead.

use axum::{
    Json,
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use choir_chorus::{CycleError, Effect};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::SharedState;

/// A prompt submission, over HTTP or inside a `submit_prompt` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPrompt {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(alias = "content")]
    pub prompt: String,
}

impl SubmitPrompt {
    fn thread_id(&self) -> String {
        self.thread_id
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

fn cycle_error_response(e: &CycleError) -> Response {
    let status = match e {
        CycleError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
        CycleError::StateInvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorBody {
        error: e.to_string(),
        kind: e.kind().as_str(),
    };
    (status, Json(body)).into_response()
}

/// `POST /v1/chorus`: run one cycle and return its effects.
pub async fn chorus_handler(
    State(state): State<SharedState>,
    Json(request): Json<SubmitPrompt>,
) -> Response {
    let thread_id = request.thread_id();
    info!(thread_id = %thread_id, prompt_len = request.prompt.len(), "Chorus request");

    match state.cycle.run(&thread_id, &request.prompt).await {
        Ok(outcome) => {
            state.executor.execute_all(&outcome.effects);
            Json(outcome.effects).into_response()
        }
        Err(e) => {
            warn!(thread_id = %thread_id, error = %e, "Chorus request rejected");
            cycle_error_response(&e)
        }
    }
}

/// `GET /ws`: streaming cycle runs over a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// WebSocket message from the client.
#[derive(Deserialize)]
struct WsClientMessage {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse a client frame into a prompt submission.
pub fn parse_client_message(text: &str) -> Result<SubmitPrompt, String> {
    let message: WsClientMessage =
        serde_json::from_str(text).map_err(|e| format!("Invalid message: {e}"))?;

    if message.msg_type != "submit_prompt" {
        return Err(format!("Unknown message type: '{}'", message.msg_type));
    }

    serde_json::from_value(message.data).map_err(|e| format!("Invalid submit_prompt data: {e}"))
}

fn error_frame(kind: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "error",
        "data": { "kind": kind, "message": message },
    })
}

/// Wrap an effect in the `{ type, data }` envelope.
pub fn effect_frame(effect: &Effect) -> serde_json::Result<serde_json::Value> {
    let mut data = serde_json::to_value(effect)?;
    let mut frame_type = data
        .as_object_mut()
        .and_then(|fields| fields.remove("type"))
        .unwrap_or(serde_json::Value::Null);

    if let Effect::StageOutput { content, .. } = effect {
        frame_type = serde_json::Value::String("chorus_response".into());
        if let (Some(fields), Some(decision)) = (data.as_object_mut(), content.as_object()) {
            for key in ["loop", "reasoning"] {
                if let Some(value) = decision.get(key) {
                    fields.insert(key.into(), value.clone());
                }
            }
        }
    }

    Ok(serde_json::json!({ "type": frame_type, "data": data }))
}

/// Serialize a frame; unserializable values are logged and skipped.
fn encode<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Dropping unserializable WebSocket frame");
            None
        }
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    match encode(value) {
        Some(json) => socket.send(WsMessage::Text(json.into())).await,
        None => Ok(()),
    }
}

async fn handle_ws_connection(mut socket: WebSocket, state: SharedState) {
    info!("WebSocket connection established");

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue, // ignore binary, ping, pong
            Err(_) => break,
        };

        let request = match parse_client_message(&text) {
            Ok(request) => request,
            Err(message) => {
                if send_json(&mut socket, &error_frame("invalid_message", &message))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        if !stream_cycle(&mut socket, &state, request).await {
            break;
        }
    }

    info!("WebSocket connection closed");
}

/// Run a cycle, forwarding effects as they are emitted. Returns `false`
/// once the client is gone.
async fn stream_cycle(socket: &mut WebSocket, state: &SharedState, request: SubmitPrompt) -> bool {
    let thread_id = request.thread_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<Effect>();

    let cycle = state.cycle.clone();
    let run_thread = thread_id.clone();
    let handle =
        tokio::spawn(async move { cycle.run_streaming(&run_thread, &request.prompt, tx).await });

    while let Some(effect) = rx.recv().await {
        state.executor.execute(&effect);
        let frame = match effect_frame(&effect) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "Skipping effect frame");
                continue;
            }
        };
        if send_json(socket, &frame).await.is_err() {
            // client disconnected: abandon the run between stages
            handle.abort();
            return false;
        }
    }

    let frame = match handle.await {
        Ok(Ok(outcome)) => {
            debug!(
                thread_id = %thread_id,
                iterations = outcome.iterations,
                "Streamed chorus cycle"
            );
            return true;
        }
        Ok(Err(e)) => error_frame(e.kind().as_str(), &e.to_string()),
        Err(e) => {
            warn!(thread_id = %thread_id, error = %e, "Chorus task failed");
            error_frame("internal", "cycle task failed")
        }
    };
    send_json(socket, &frame).await.is_ok()
}
