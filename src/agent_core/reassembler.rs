//! Response Reassembler: fold tool results back into the conversation.

use std::fmt::Write as _;

use serde_json::Value;

use crate::inference::types::{ChatMessage, ToolCall};
use crate::tools::ToolResult;

const FALLBACK_SNIPPET_CHARS: usize = 200;

/// Conversation for the follow-up completion: the history, the assistant
/// message that requested the calls, then one `tool` message per result.
pub fn build_follow_up(
    conversation: &[ChatMessage],
    display_text: &str,
    calls: &[ToolCall],
    results: &[ToolResult],
) -> Vec<ChatMessage> {
    let mut messages = conversation.to_vec();
    messages.extend(tool_exchange(display_text, calls, results));
    messages
}

/// The messages appended to the session for one round of tool use.
pub fn tool_exchange(display_text: &str, calls: &[ToolCall], results: &[ToolResult]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(results.len() + 1);
    messages.push(ChatMessage::assistant_tool_calls(display_text, calls));
    for result in results {
        messages.push(ChatMessage::tool_result(
            &result.tool_call_id,
            &result.to_message_content(),
        ));
    }
    messages
}

/// Plain-text rendering of results, used when the follow-up completion fails.
pub fn render_results_fallback(results: &[ToolResult]) -> String {
    if results.is_empty() {
        return "I wasn't able to complete that request.".to_string();
    }

    let mut out = String::from("I couldn't reach the model to summarize, so here are the raw tool results:\n");
    for result in results {
        out.push('\n');
        if !result.success {
            let _ = writeln!(
                out,
                "{} failed: {}",
                result.tool_name,
                result.error.as_deref().unwrap_or("unknown error")
            );
            continue;
        }
        let body = result.result.as_ref().unwrap_or(&Value::Null);
        match result.tool_name.as_str() {
            "web_search" => render_search(&mut out, body),
            "calculator" => render_calculator(&mut out, body),
            "run_code" => render_code(&mut out, body),
            "grounded_answer" => render_grounded(&mut out, body),
            _ => {
                let _ = writeln!(out, "{}: {body}", result.tool_name);
            }
        }
    }
    out.trim_end().to_string()
}

fn str_field<'a>(body: &'a Value, key: &str) -> &'a str {
    body.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn render_search(out: &mut String, body: &Value) {
    let _ = writeln!(out, "Search results for \"{}\":", str_field(body, "query"));
    let results = body.get("results").and_then(Value::as_array);
    match results {
        Some(items) if !items.is_empty() => {
            for (i, item) in items.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}. {} - {}",
                    i + 1,
                    str_field(item, "title"),
                    str_field(item, "url")
                );
                let snippet = str_field(item, "snippet");
                if !snippet.is_empty() {
                    let short: String = snippet.chars().take(FALLBACK_SNIPPET_CHARS).collect();
                    let _ = writeln!(out, "   {short}");
                }
            }
        }
        _ => out.push_str("(no results)\n"),
    }
}

fn render_calculator(out: &mut String, body: &Value) {
    let expression = str_field(body, "expression");
    match body.get("formatted").and_then(Value::as_str) {
        Some(formatted) => {
            let _ = writeln!(out, "{expression} = {formatted}");
        }
        None => {
            let _ = writeln!(out, "{expression}: {}", str_field(body, "result"));
        }
    }
}

fn render_code(out: &mut String, body: &Value) {
    let _ = writeln!(out, "Code ({}) output:", str_field(body, "language"));
    let stdout = str_field(body, "stdout");
    if !stdout.is_empty() {
        let _ = writeln!(out, "{}", stdout.trim_end());
    }
    if let Some(result) = body.get("result").and_then(Value::as_str) {
        let _ = writeln!(out, "=> {result}");
    }
}

fn render_grounded(out: &mut String, body: &Value) {
    let _ = writeln!(out, "{}", str_field(body, "answer"));
    if let Some(sources) = body.get("sources").and_then(Value::as_array) {
        for source in sources {
            let index = source.get("index").and_then(Value::as_u64).unwrap_or(0);
            if let Some(url) = source.get("url").and_then(Value::as_str) {
                let _ = writeln!(out, "[{index}] {url}");
            }
        }
    }
}
