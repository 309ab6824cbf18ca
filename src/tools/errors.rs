//! Tool dispatch error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::upstream::{UpstreamError, UpstreamErrorKind};

/// Errors produced while validating or executing a tool call.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// An argument failed validation. Raised before any I/O.
    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    /// The call named a tool outside the allow-list.
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// A recognized operation that this build does not perform.
    #[error("operation '{operation}' is not implemented")]
    NotImplemented { operation: String },

    /// The provider behind the tool failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The call did not finish within its time bound.
    #[error("{tool} timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// Evaluation failed (math error, code runtime error).
    #[error("{reason}")]
    Execution { reason: String },
}

/// Category reported as `error_kind` in a `ToolResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidArgument,
    UnknownTool,
    NotImplemented,
    Execution,
    RateLimited,
    Unauthorized,
    QuotaExceeded,
    Timeout,
    MalformedResponse,
    Connection,
    Http,
}

impl ToolError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::InvalidArgument { .. } => ToolErrorKind::InvalidArgument,
            Self::UnknownTool { .. } => ToolErrorKind::UnknownTool,
            Self::NotImplemented { .. } => ToolErrorKind::NotImplemented,
            Self::Execution { .. } => ToolErrorKind::Execution,
            Self::Timeout { .. } => ToolErrorKind::Timeout,
            Self::Upstream(e) => match e.kind() {
                UpstreamErrorKind::RateLimited => ToolErrorKind::RateLimited,
                UpstreamErrorKind::Unauthorized => ToolErrorKind::Unauthorized,
                UpstreamErrorKind::QuotaExceeded => ToolErrorKind::QuotaExceeded,
                UpstreamErrorKind::Timeout => ToolErrorKind::Timeout,
                UpstreamErrorKind::MalformedResponse => ToolErrorKind::MalformedResponse,
                UpstreamErrorKind::Connection => ToolErrorKind::Connection,
                UpstreamErrorKind::Http => ToolErrorKind::Http,
            },
        }
    }

    /// Message placed in the `error` field of a failed result.
    pub fn user_message(&self) -> String {
        match self {
            Self::Upstream(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_maps_upstream_categories() {
        let err = ToolError::from(UpstreamError::from_status("brave", 429, "slow down"));
        assert_eq!(err.kind(), ToolErrorKind::RateLimited);
        let err = ToolError::from(UpstreamError::from_status("brave", 402, ""));
        assert_eq!(err.kind(), ToolErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ToolErrorKind::InvalidArgument).unwrap();
        assert_eq!(json, "\"invalid_argument\"");
    }

    #[test]
    fn test_invalid_argument_names_field() {
        let err = ToolError::invalid("query", "must not be empty");
        assert_eq!(err.to_string(), "invalid argument 'query': must not be empty");
    }
}
