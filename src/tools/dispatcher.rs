//! ToolDispatcher: validate → execute under a timeout → `ToolResult`.
//!
//! Dispatch never fails outright. Every outcome, including unknown tools and
//! timeouts, becomes a `ToolResult` the model can read in the follow-up pass.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use super::errors::{ToolError, ToolErrorKind};
use super::grounded::GroundedAnswer;
use super::search::WebSearch;
use super::validation::{validate, ToolArgs};
use super::{calculator, sandbox, ToolName};
use crate::config::ToolsConfig;
use crate::inference::types::{ToolCall, ToolDefinition};
use crate::tokens::truncate_utf8;

/// Cap on a serialized result placed into the follow-up context.
const MAX_RESULT_CONTENT_BYTES: usize = 24 * 1024;

/// Outcome of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, tool_name: &str, result: Json, elapsed: Duration) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: tool_name.to_string(),
            success: true,
            result: Some(result),
            error: None,
            error_kind: None,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(call: &ToolCall, tool_name: &str, err: &ToolError, elapsed: Duration) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: tool_name.to_string(),
            success: false,
            result: None,
            error: Some(err.user_message()),
            error_kind: Some(err.kind()),
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }

    /// Content of the `tool` message sent back to the model.
    pub fn to_message_content(&self) -> String {
        let body = if self.success {
            json!({"success": true, "result": self.result})
        } else {
            json!({"success": false, "error": self.error, "error_kind": self.error_kind})
        };
        let text = body.to_string();
        if text.len() <= MAX_RESULT_CONTENT_BYTES {
            return text;
        }
        format!("{}… [truncated]", truncate_utf8(&text, MAX_RESULT_CONTENT_BYTES))
    }
}

// ─── ToolDispatcher ─────────────────────────────────────────────────────────

/// Routes normalized calls to the allow-listed tools.
#[derive(Clone)]
pub struct ToolDispatcher {
    config: ToolsConfig,
    search: WebSearch,
    grounded: GroundedAnswer,
    timeout: Duration,
    grounded_timeout: Duration,
}

impl ToolDispatcher {
    pub fn from_config(config: &ToolsConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self {
            config: config.clone(),
            search: WebSearch::from_config(&config.search, timeout),
            grounded: GroundedAnswer::from_config(&config.grounded),
            timeout,
            grounded_timeout: Duration::from_secs(config.grounded.timeout_secs),
        }
    }

    /// Override both dispatch timeouts.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.grounded_timeout = timeout;
        self
    }

    /// Tools advertised to the model. Grounded answers need an API key.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        ToolName::ALL
            .iter()
            .filter(|tool| **tool != ToolName::GroundedAnswer || self.grounded.is_configured())
            .map(ToolName::definition)
            .collect()
    }

    fn timeout_for(&self, tool: ToolName) -> Duration {
        match tool {
            ToolName::GroundedAnswer => self.grounded_timeout,
            _ => self.timeout,
        }
    }

    /// Dispatch one call. Never fails; errors become failed results.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();

        let Some(tool) = ToolName::parse(&call.name) else {
            let err = ToolError::UnknownTool {
                name: call.name.clone(),
            };
            tracing::warn!(tool = %call.name, call_id = %call.id, "rejected unknown tool");
            return ToolResult::failed(call, &call.name, &err, start.elapsed());
        };

        let args = match validate(tool, &call.arguments, &self.config) {
            Ok(args) => args,
            Err(err) => {
                tracing::info!(tool = %tool, call_id = %call.id, error = %err, "tool arguments rejected");
                return ToolResult::failed(call, tool.as_str(), &err, start.elapsed());
            }
        };

        let timeout = self.timeout_for(tool);
        tracing::info!(tool = %tool, call_id = %call.id, "dispatching tool call");

        let outcome = match tokio::time::timeout(timeout, self.execute(args)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::Timeout {
                tool: tool.as_str().to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        let elapsed = start.elapsed();
        match outcome {
            Ok(result) => {
                tracing::info!(
                    tool = %tool,
                    call_id = %call.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "tool call succeeded"
                );
                ToolResult::ok(call, tool.as_str(), result, elapsed)
            }
            Err(err) => {
                tracing::warn!(
                    tool = %tool,
                    call_id = %call.id,
                    kind = ?err.kind(),
                    error = %err,
                    "tool call failed"
                );
                ToolResult::failed(call, tool.as_str(), &err, elapsed)
            }
        }
    }

    async fn execute(&self, args: ToolArgs) -> Result<Json, ToolError> {
        match args {
            ToolArgs::Search(a) => Ok(self.search.search(&a).await),
            ToolArgs::Calculator(a) => calculator::run(&a),
            ToolArgs::Code(a) => {
                let limit = Duration::from_millis(self.config.code.timeout_ms).min(self.timeout);
                sandbox::run(a.language, &a.code, limit).await
            }
            ToolArgs::Grounded(a) => self.grounded.answer(&a).await,
        }
    }
}
