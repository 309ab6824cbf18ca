//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that can occur while running a chat turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Session not found.
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },

    /// The user message was empty.
    #[error("message must not be empty")]
    EmptyMessage,

    /// The first completion of a turn failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// Shared state could not be accessed.
    #[error("session store unavailable: {reason}")]
    StateUnavailable { reason: String },
}

impl AgentError {
    /// Short text safe to show to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Inference(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}
