//! Token estimation and context-window trimming.
//!
//! Character-based heuristics: prose runs ~3.2 chars/token, JSON (tool
//! arguments and tool results) ~2.8. Overestimating is the safe direction.

use crate::inference::types::{ChatMessage, Role};

const CHARS_PER_TOKEN: f64 = 3.2;

const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Overhead for tool call JSON structure (per call).
const TOOL_CALL_OVERHEAD_TOKENS: u32 = 10;

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as f64 / CHARS_PER_TOKEN).ceil() as u32
}

pub fn estimate_json_tokens(json_text: &str) -> u32 {
    (json_text.len() as f64 / JSON_CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for a `ChatMessage`, including tool calls.
pub fn estimate_message_tokens(message: &ChatMessage) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;

    if let Some(ref content) = message.content {
        total += match message.role {
            Role::Tool => estimate_json_tokens(content),
            _ => estimate_tokens(content),
        };
    }

    if let Some(ref calls) = message.tool_calls {
        for call in calls {
            total += TOOL_CALL_OVERHEAD_TOKENS;
            total += estimate_tokens(&call.function.name);
            total += estimate_json_tokens(&call.function.arguments);
        }
    }

    if let Some(ref id) = message.tool_call_id {
        total += estimate_tokens(id);
    }

    total
}

/// Select the messages to send so the request fits in `budget` tokens.
///
/// The leading system message and the newest message are always kept.
/// Older messages are dropped from the front; a `tool` message is never
/// kept without the assistant message that issued its call, so the cut is
/// moved forward past any orphaned tool results.
pub fn fit_to_budget(messages: &[ChatMessage], budget: u32) -> Vec<ChatMessage> {
    if messages.is_empty() {
        return Vec::new();
    }

    let (system, rest) = match messages.first() {
        Some(first) if first.role == Role::System => (Some(first), &messages[1..]),
        _ => (None, messages),
    };

    let mut used = system.map(estimate_message_tokens).unwrap_or(0);
    let mut start = rest.len();
    while start > 0 {
        let cost = estimate_message_tokens(&rest[start - 1]);
        if used + cost > budget && start < rest.len() {
            break;
        }
        used += cost;
        start -= 1;
    }

    while start < rest.len().saturating_sub(1) && rest[start].role == Role::Tool {
        start += 1;
    }

    if start > 0 {
        tracing::debug!(
            dropped = start,
            kept = rest.len() - start,
            budget,
            "trimmed conversation history to context budget"
        );
    }

    system
        .into_iter()
        .cloned()
        .chain(rest[start..].iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_utf8_on_char_boundary() {
        let s = "héllo";
        assert_eq!(truncate_utf8(s, 2), "h");
        assert_eq!(truncate_utf8(s, 3), "hé");
        assert_eq!(truncate_utf8(s, 100), s);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 2);
    }

    #[test]
    fn test_fit_to_budget_keeps_everything_when_small() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ];
        let fitted = fit_to_budget(&messages, 10_000);
        assert_eq!(fitted.len(), 3);
    }

    #[test]
    fn test_fit_to_budget_drops_oldest_but_keeps_system_and_latest() {
        let long = "x".repeat(3200);
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user(&long),
            ChatMessage::assistant(&long),
            ChatMessage::user("latest question"),
        ];
        let fitted = fit_to_budget(&messages, 200);
        assert_eq!(fitted.len(), 2);
        assert_eq!(fitted[0].role, Role::System);
        assert_eq!(fitted[1].content.as_deref(), Some("latest question"));
    }

    #[test]
    fn test_fit_to_budget_skips_orphaned_tool_results() {
        let long = "x".repeat(3200);
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::assistant(&long),
            ChatMessage::tool_result("call_1", "{}"),
            ChatMessage::user("next"),
        ];
        let fitted = fit_to_budget(&messages, 30);
        assert!(fitted.iter().all(|m| m.role != Role::Tool));
        assert_eq!(fitted.last().unwrap().content.as_deref(), Some("next"));
    }
}
