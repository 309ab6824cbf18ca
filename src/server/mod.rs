//! HTTP surface: JSON chat, SSE streaming chat, direct tool execution, and
//! session inspection.

pub mod errors;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use errors::ApiError;

use crate::agent_core::{ChatService, SessionLimits};
use crate::config::{AppConfig, ServerConfig};
use crate::inference::{ChatClient, InferenceError};
use crate::tools::ToolDispatcher;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(chat: ChatService) -> Self {
        Self {
            chat: Arc::new(chat),
        }
    }

    /// Wire the chat client, tool dispatcher and session store from config.
    pub fn from_config(config: &AppConfig) -> Result<Self, InferenceError> {
        let client = ChatClient::from_config(config.llm.clone())?;
        let dispatcher = ToolDispatcher::from_config(&config.tools);
        let limits = SessionLimits {
            max_sessions: config.server.max_sessions,
            idle_timeout: Duration::from_secs(config.server.session_idle_secs),
        };
        Ok(Self::new(
            ChatService::new(
                client,
                dispatcher,
                &config.llm.system_prompt,
                config.streaming.natural_language_intents,
            )
            .with_session_limits(limits),
        ))
    }
}

pub fn router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/tools", get(handlers::list_tools))
        .route("/api/tools/execute", post(handlers::execute_tool))
        .route("/api/chat", post(handlers::chat))
        .route("/api/chat/stream", post(handlers::chat_stream))
        .route("/api/sessions/:id/messages", get(handlers::session_messages))
        .route("/api/sessions/:id/clear", post(handlers::clear_session))
        .route("/api/sessions/:id", delete(handlers::delete_session))
        .layer(CatchPanicLayer::new())
        .layer(cors_layer(&server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use serde_json::{json, Value};

    async fn spawn_app(config: AppConfig) -> String {
        let state = AppState::from_config(&config).unwrap();
        let app = router(state, &config.server);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn offline_config() -> AppConfig {
        AppConfig {
            llm: LlmConfig {
                base_url: "http://127.0.0.1:9".into(),
                ..LlmConfig::default()
            },
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_llm() {
        let base = spawn_app(offline_config()).await;
        let body: Value = reqwest::get(format!("{base}/api/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["llm_reachable"], false);
        assert_eq!(body["model"], LlmConfig::default().model);
    }

    #[tokio::test]
    async fn test_execute_tool_routes() {
        let base = spawn_app(offline_config()).await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{base}/api/tools/execute"))
            .json(&json!({"tool": "calculator", "arguments": {"expression": "sqrt(16)"}, "call_id": "c1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["tool_call_id"], "c1");
        assert_eq!(body["result"]["result"], 4);

        let resp = http
            .post(format!("{base}/api/tools/execute"))
            .json(&json!({"tool": "rm_rf", "arguments": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_tools_and_sessions_routes() {
        let base = spawn_app(offline_config()).await;
        let http = reqwest::Client::new();

        let tools: Value = http
            .get(format!("{base}/api/tools"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tools.as_array().unwrap().len(), 3);

        let resp = http
            .get(format!("{base}/api/sessions/missing/messages"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = http
            .post(format!("{base}/api/sessions/missing/clear"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = http
            .post(format!("{base}/api/chat"))
            .json(&json!({"message": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
