//! Chat client error types.
//!
//! Structured logging is the caller's responsibility; these types carry the
//! context needed to build meaningful log entries.

use thiserror::Error;

use crate::upstream::{UpstreamError, UpstreamErrorKind};

/// Errors that can occur while talking to the chat completion endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The provider request failed (transport, status, or body shape).
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// A native tool call could not be decoded.
    #[error("tool call parse error: {reason}")]
    ToolCallParseError { raw_response: String, reason: String },

    /// Every model in the fallback chain was unavailable.
    #[error("all models unavailable (tried: {})", attempted.join(", "))]
    AllModelsUnavailable { attempted: Vec<String> },
}

impl InferenceError {
    /// Whether the next model in the fallback chain should be tried.
    ///
    /// 404 is included because OpenAI-compatible gateways answer 404 for a
    /// model they do not serve; the next model may still be available.
    pub fn is_retriable(&self) -> bool {
        match self {
            InferenceError::Upstream(e) => match e.kind() {
                UpstreamErrorKind::Connection | UpstreamErrorKind::Timeout => true,
                UpstreamErrorKind::Http => {
                    matches!(e.status(), Some(404) | Some(500..=599))
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Short message suitable for the end user.
    pub fn user_message(&self) -> String {
        match self {
            InferenceError::Upstream(e) => e.user_message(),
            InferenceError::AllModelsUnavailable { .. } => {
                "The language model is currently unavailable.".to_string()
            }
            InferenceError::StreamError { .. } | InferenceError::ToolCallParseError { .. } => {
                "The language model returned an unreadable response.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> InferenceError {
        InferenceError::Upstream(UpstreamError::from_status("llm", status, ""))
    }

    #[test]
    fn test_is_retriable() {
        assert!(http(404).is_retriable());
        assert!(http(500).is_retriable());
        assert!(http(503).is_retriable());
        assert!(!http(400).is_retriable());
        assert!(!http(401).is_retriable());
        assert!(!http(429).is_retriable());
        assert!(InferenceError::Upstream(UpstreamError::Connection {
            provider: "llm".into(),
            reason: "refused".into(),
        })
        .is_retriable());
        assert!(!InferenceError::StreamError {
            reason: "bad".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_user_message_for_upstream() {
        let msg = http(401).user_message();
        assert!(msg.contains("credentials"));
    }
}
