//! Route-boundary error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::agent_core::AgentError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Agent(AgentError::EmptyMessage) => StatusCode::BAD_REQUEST,
            Self::Agent(AgentError::SessionNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Agent(AgentError::Inference(_)) => StatusCode::BAD_GATEWAY,
            Self::Agent(AgentError::StateUnavailable { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Agent(AgentError::StateUnavailable { .. }) => {
                tracing::error!(error = %self, "internal error");
                "internal error".to_string()
            }
            Self::Agent(e) => {
                if status == StatusCode::BAD_GATEWAY {
                    tracing::warn!(error = %e, "upstream failure");
                }
                e.user_message()
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(AgentError::EmptyMessage).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(AgentError::SessionNotFound {
                session_id: "x".into()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(AgentError::StateUnavailable {
                reason: "poisoned".into()
            })
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
