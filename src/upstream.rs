//! Typed outcomes for failed calls to third-party HTTP APIs.
//!
//! The LLM provider, the search providers and the grounded-answer API all
//! fail in the same handful of ways. Classifying them once here keeps the
//! user-facing wording consistent and lets callers decide on retries by
//! category instead of by status code.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::tokens::truncate_utf8;

/// Maximum number of body bytes kept in an error for logging.
const MAX_ERROR_BODY: usize = 512;

/// A failed request to an upstream provider.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// HTTP 429 without a quota marker.
    #[error("{provider}: rate limited")]
    RateLimited { provider: String },

    /// HTTP 401 / 403.
    #[error("{provider}: unauthorized")]
    Unauthorized { provider: String },

    /// HTTP 402, or a 429 whose body names an exhausted quota.
    #[error("{provider}: quota exceeded")]
    QuotaExceeded { provider: String },

    /// The request did not finish within the configured bound.
    #[error("{provider}: timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    /// The provider answered, but not in the shape we read.
    #[error("{provider}: malformed response: {reason}")]
    MalformedResponse { provider: String, reason: String },

    /// TCP/TLS connection could not be established.
    #[error("{provider}: connection failed: {reason}")]
    Connection { provider: String, reason: String },

    /// Any other non-2xx status.
    #[error("{provider}: HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },
}

/// Wire-level category name for an [`UpstreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    RateLimited,
    Unauthorized,
    QuotaExceeded,
    Timeout,
    MalformedResponse,
    Connection,
    Http,
}

impl UpstreamError {
    /// Map a non-success status and its body to a category.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        let provider = provider.to_string();
        let lowered = body.to_ascii_lowercase();
        match status {
            401 | 403 => Self::Unauthorized { provider },
            402 => Self::QuotaExceeded { provider },
            429 if lowered.contains("quota") || lowered.contains("insufficient") => {
                Self::QuotaExceeded { provider }
            }
            429 => Self::RateLimited { provider },
            408 | 504 => Self::Timeout {
                provider,
                timeout_ms: 0,
            },
            _ => Self::Http {
                provider,
                status,
                body: truncate_utf8(body, MAX_ERROR_BODY).to_string(),
            },
        }
    }

    /// Map a transport error from `reqwest`.
    pub fn from_reqwest(provider: &str, err: &reqwest::Error, timeout: Duration) -> Self {
        let provider = provider.to_string();
        if err.is_timeout() {
            Self::Timeout {
                provider,
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if err.is_decode() {
            Self::MalformedResponse {
                provider,
                reason: err.to_string(),
            }
        } else {
            Self::Connection {
                provider,
                reason: err.to_string(),
            }
        }
    }

    pub fn malformed(provider: &str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> UpstreamErrorKind {
        match self {
            Self::RateLimited { .. } => UpstreamErrorKind::RateLimited,
            Self::Unauthorized { .. } => UpstreamErrorKind::Unauthorized,
            Self::QuotaExceeded { .. } => UpstreamErrorKind::QuotaExceeded,
            Self::Timeout { .. } => UpstreamErrorKind::Timeout,
            Self::MalformedResponse { .. } => UpstreamErrorKind::MalformedResponse,
            Self::Connection { .. } => UpstreamErrorKind::Connection,
            Self::Http { .. } => UpstreamErrorKind::Http,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short message suitable for showing to the end user.
    ///
    /// Never includes response bodies or transport details.
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited { provider } => {
                format!("{provider} is rate limiting requests. Please try again shortly.")
            }
            Self::Unauthorized { provider } => {
                format!("{provider} rejected the configured credentials.")
            }
            Self::QuotaExceeded { provider } => {
                format!("{provider} quota is exhausted.")
            }
            Self::Timeout { provider, .. } => format!("{provider} did not respond in time."),
            Self::MalformedResponse { provider, .. } => {
                format!("{provider} returned an unexpected response.")
            }
            Self::Connection { provider, .. } => format!("Could not reach {provider}."),
            Self::Http {
                provider, status, ..
            } => format!("{provider} returned an error (HTTP {status})."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            UpstreamError::from_status("p", 401, "").kind(),
            UpstreamErrorKind::Unauthorized
        );
        assert_eq!(
            UpstreamError::from_status("p", 403, "").kind(),
            UpstreamErrorKind::Unauthorized
        );
        assert_eq!(
            UpstreamError::from_status("p", 429, "slow down").kind(),
            UpstreamErrorKind::RateLimited
        );
        assert_eq!(
            UpstreamError::from_status("p", 429, r#"{"error":{"code":"insufficient_quota"}}"#)
                .kind(),
            UpstreamErrorKind::QuotaExceeded
        );
        assert_eq!(
            UpstreamError::from_status("p", 402, "").kind(),
            UpstreamErrorKind::QuotaExceeded
        );
        assert_eq!(
            UpstreamError::from_status("p", 504, "").kind(),
            UpstreamErrorKind::Timeout
        );
        let err = UpstreamError::from_status("p", 500, "boom");
        assert_eq!(err.kind(), UpstreamErrorKind::Http);
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn test_http_body_truncated() {
        let body = "x".repeat(4096);
        match UpstreamError::from_status("p", 500, &body) {
            UpstreamError::Http { body, .. } => assert_eq!(body.len(), MAX_ERROR_BODY),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_user_message_hides_body() {
        let err = UpstreamError::from_status("search", 500, "stack trace at line 42");
        let msg = err.user_message();
        assert!(msg.contains("HTTP 500"));
        assert!(!msg.contains("stack trace"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&UpstreamErrorKind::QuotaExceeded).unwrap();
        assert_eq!(json, "\"quota_exceeded\"");
    }
}
