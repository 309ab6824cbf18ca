//! Shared types for the chat client.
//!
//! `ChatMessage` is the conversation record kept per session. The provider
//! never sees it directly: requests carry `WireMessage`, which drops the
//! local bookkeeping fields (`id`, `created_at`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Conversation Types ──────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role, content: Option<String>) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4()),
            role,
            content,
            tool_call_id: None,
            tool_calls: None,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self::new(Role::System, Some(content.to_string()))
    }

    pub fn user(content: &str) -> Self {
        Self::new(Role::User, Some(content.to_string()))
    }

    pub fn assistant(content: &str) -> Self {
        Self::new(Role::Assistant, Some(content.to_string()))
    }

    /// Assistant message that issued tool calls. `content` is the cleaned
    /// display text, which may be empty.
    pub fn assistant_tool_calls(content: &str, calls: &[ToolCall]) -> Self {
        let mut msg = Self::new(Role::Assistant, Some(content.to_string()));
        msg.tool_calls = Some(calls.iter().map(ToolCall::to_response).collect());
        msg
    }

    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        let mut msg = Self::new(Role::Tool, Some(content.to_string()));
        msg.tool_call_id = Some(tool_call_id.to_string());
        msg
    }
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// The provider-facing view of a `ChatMessage`.
///
/// `content` must be `""` (not `null`) for assistant messages with tool
/// calls; several OpenAI-compatible servers reject `null` there.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: Role,
    #[serde(serialize_with = "serialize_content")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls: msg.tool_calls.clone(),
        }
    }
}

fn serialize_content<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(s) => serializer.serialize_str(s),
        None => serializer.serialize_str(""),
    }
}

/// Tool definition sent in the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

/// Function definition within a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// A normalized tool call, whatever encoding it arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this call (generated if the model didn't provide one).
    pub id: String,
    pub name: String,
    /// Always a JSON object.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Build a call with a freshly generated id.
    pub fn new(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            id: new_call_id(),
            name: name.to_string(),
            arguments,
        }
    }

    /// OpenAI response shape, with arguments re-encoded as a JSON string.
    pub fn to_response(&self) -> ToolCallResponse {
        ToolCallResponse {
            id: self.id.clone(),
            r#type: "function".to_string(),
            function: FunctionCallResponse {
                name: self.name.clone(),
                arguments: self.arguments.to_string(),
            },
        }
    }
}

pub fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4())
}

/// Tool call as returned in the OpenAI response format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCallResponse,
}

/// Function call details in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

/// One unit of model output: a streamed delta, or a whole non-streamed reply.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Incremental text (streaming) or the full text (non-streaming).
    pub token: Option<String>,
    /// Native tool calls, emitted once they are complete.
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Why the model stopped: `"stop"`, `"tool_calls"`, or `None` (still going).
    pub finish_reason: Option<String>,
}

/// Raw SSE chunk from the OpenAI API.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

/// A tool call fragment within a streaming delta.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkToolCall {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub function: Option<ChunkFunction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkFunction {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_message_omits_local_fields() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_value(WireMessage::from(&msg)).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        assert!(json.get("id").is_none());
        assert!(json.get("created_at").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn test_wire_message_null_content_becomes_empty_string() {
        let mut msg = ChatMessage::assistant("");
        msg.content = None;
        let json = serde_json::to_string(&WireMessage::from(&msg)).unwrap();
        assert!(json.contains(r#""content":"""#));
    }

    #[test]
    fn test_assistant_tool_calls_encodes_arguments_as_string() {
        let call = ToolCall::new("web_search", serde_json::json!({"query": "rust"}));
        let msg = ChatMessage::assistant_tool_calls("", std::slice::from_ref(&call));
        let calls = msg.tool_calls.unwrap();
        assert_eq!(calls[0].id, call.id);
        assert_eq!(calls[0].r#type, "function");
        assert_eq!(calls[0].function.arguments, r#"{"query":"rust"}"#);
    }

    #[test]
    fn test_tools_omitted_when_none() {
        let req = ChatCompletionRequest {
            model: "test".to_string(),
            messages: vec![],
            tools: None,
            tool_choice: None,
            temperature: 0.7,
            max_tokens: 1024,
            stream: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("tools"));
        assert!(!json.contains("tool_choice"));
    }

    #[test]
    fn test_new_call_id_prefix() {
        assert!(new_call_id().starts_with("call_"));
    }
}
