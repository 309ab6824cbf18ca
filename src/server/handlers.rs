//! Route handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::errors::ApiError;
use super::AppState;
use crate::agent_core::{TurnEvent, TurnOutcome};
use crate::inference::ToolCall;
use crate::tools::{ToolName, ToolResult};

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

// ─── Request Bodies ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteToolRequest {
    pub tool: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
    #[serde(default)]
    pub call_id: Option<String>,
}

fn empty_object() -> Value {
    json!({})
}

// ─── Health & Tools ──────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let client = state.chat.client();
    let reachable = client.health_check().await;
    Json(json!({
        "status": "ok",
        "model": client.model(),
        "llm_reachable": reachable,
    }))
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.chat.dispatcher().definitions()))
}

pub async fn execute_tool(
    State(state): State<AppState>,
    Json(req): Json<ExecuteToolRequest>,
) -> Response {
    if ToolName::parse(&req.tool).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": format!("unknown tool: '{}'", req.tool),
            })),
        )
            .into_response();
    }

    let mut call = ToolCall::new(&req.tool, req.arguments);
    if let Some(id) = req.call_id.filter(|id| !id.trim().is_empty()) {
        call.id = id;
    }
    let result: ToolResult = state.chat.dispatcher().dispatch(&call).await;
    Json(result).into_response()
}

// ─── Chat ────────────────────────────────────────────────────────────────────

pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let outcome = state
        .chat
        .run_turn(req.session_id.as_deref(), &req.message)
        .await?;
    Ok(Json(outcome))
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (session_id, rx) = state
        .chat
        .run_turn_streaming(req.session_id.as_deref(), &req.message)?;
    tracing::info!(session_id = %session_id, "streaming turn started");

    let stream = ReceiverStream::new(rx).map(|event| Ok(to_sse(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("ka")))
}

fn to_sse(event: &TurnEvent) -> Event {
    let sse = Event::default().event(event.name());
    match serde_json::to_string(event) {
        Ok(data) => sse.data(data),
        Err(e) => {
            tracing::debug!(error = %e, "failed to serialize turn event");
            sse.data("{}")
        }
    }
}

// ─── Sessions ────────────────────────────────────────────────────────────────

pub async fn session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let shared = state.chat.sessions().get(&id)?;
    let session = shared.lock().await;
    Ok(Json(json!({
        "session_id": session.id,
        "created_at": session.created_at,
        "messages": session.conversation.history(),
    })))
}

pub async fn clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let shared = state.chat.sessions().get(&id)?;
    shared.lock().await.conversation.clear();
    tracing::info!(session_id = %id, "session cleared");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.chat.sessions().remove(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_request_defaults() {
        let req: ExecuteToolRequest = serde_json::from_str(r#"{"tool": "calculator"}"#).unwrap();
        assert_eq!(req.arguments, json!({}));
        assert!(req.call_id.is_none());
    }

    #[test]
    fn test_chat_request_session_optional() {
        let req: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert!(req.session_id.is_none());
        assert_eq!(req.message, "hi");
    }
}
