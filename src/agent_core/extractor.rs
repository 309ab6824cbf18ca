//! Intent Extractor: recover tool calls from raw model output.
//!
//! Models that do not emit native tool calls tend to write them into the
//! text as JSON. Recognized encodings, in priority order:
//!
//! 1. Wrapper object: `{"tool_calls": [...]}`
//! 2. Bare array whose elements are all call objects
//! 3. Individual call objects: `{"name", "arguments"}`, `{"function": {...}}`,
//!    `{"tool", "parameters"}`
//!
//! Matched spans are removed from the text shown to the user. A trailing,
//! still-open call marker yields `Pending` so a streaming caller can hide it
//! until the rest arrives.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::inference::tool_call_parser::parse_arguments;
use crate::inference::types::{new_call_id, ToolCall};

/// Openings of a call encoding, compared with whitespace removed.
const CALL_MARKERS: &[&str] = &[
    r#"{"tool_calls""#,
    r#"{"name""#,
    r#"{"function""#,
    r#"{"type":"function""#,
    r#"{"tool""#,
];

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Found(Vec<ToolCall>),
    /// An unterminated call marker ends the text.
    Pending,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub display_text: String,
    pub outcome: ExtractionOutcome,
}

impl Extraction {
    pub fn calls(&self) -> &[ToolCall] {
        match &self.outcome {
            ExtractionOutcome::Found(calls) => calls,
            _ => &[],
        }
    }
}

/// Extract tool calls from `text`, preferring `native` calls when present.
pub fn extract(text: &str, native: Option<&[ToolCall]>) -> Extraction {
    let scan = scan_candidates(text);
    let matched = match_text_calls(text, &scan.spans);

    if let Some(native) = native.filter(|n| !n.is_empty()) {
        let display_text = match &matched {
            Some((_, spans)) => remove_spans(text, spans),
            None => text.to_string(),
        };
        return Extraction {
            display_text,
            outcome: ExtractionOutcome::Found(native.to_vec()),
        };
    }

    if let Some((calls, spans)) = matched {
        tracing::debug!(count = calls.len(), "extracted tool calls from model text");
        return Extraction {
            display_text: remove_spans(text, &spans),
            outcome: ExtractionOutcome::Found(calls),
        };
    }

    if let Some(cut) = pending_cut(text, &scan.unterminated) {
        return Extraction {
            display_text: text[..cut].trim_end().to_string(),
            outcome: ExtractionOutcome::Pending,
        };
    }

    Extraction {
        display_text: text.to_string(),
        outcome: ExtractionOutcome::NotFound,
    }
}

// ─── Candidate Scanning ─────────────────────────────────────────────────────

struct Scan {
    /// Balanced `{…}` / `[…]` spans, outermost only, as byte ranges.
    spans: Vec<(usize, usize)>,
    /// Positions of openers that never close.
    unterminated: Vec<usize>,
}

fn scan_candidates(text: &str) -> Scan {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut unterminated = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if matches!(bytes[i], b'{' | b'[') {
            match find_matching_close(bytes, i) {
                Some(close) => {
                    spans.push((i, close + 1));
                    i = close + 1;
                    continue;
                }
                // Inner objects of a truncated wrapper may still be complete.
                None => unterminated.push(i),
            }
        }
        i += 1;
    }

    Scan {
        spans,
        unterminated,
    }
}

/// Index of the bracket closing the one at `start`, ignoring brackets inside
/// JSON strings. Mismatched bracket kinds end the candidate.
fn find_matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Pattern Matching ───────────────────────────────────────────────────────

type Matched = (Vec<ToolCall>, Vec<(usize, usize)>);

fn match_text_calls(text: &str, spans: &[(usize, usize)]) -> Option<Matched> {
    let parsed: Vec<(usize, usize, Value)> = spans
        .iter()
        .filter_map(|&(start, end)| {
            let raw = &text[start..end];
            match serde_json::from_str::<Value>(raw) {
                Ok(value) => Some((start, end, value)),
                Err(e) => {
                    if looks_like_call(raw) {
                        tracing::debug!(error = %e, "ignoring malformed tool call JSON");
                    }
                    None
                }
            }
        })
        .collect();

    let patterns: [fn(&Value) -> Vec<ToolCall>; 3] = [wrapper_calls, array_calls, object_call];
    for pattern in patterns {
        let mut calls = Vec::new();
        let mut matched = Vec::new();
        for (start, end, value) in &parsed {
            let found = pattern(value);
            if !found.is_empty() {
                calls.extend(found);
                matched.push((*start, *end));
            }
        }
        if !calls.is_empty() {
            return Some((calls, matched));
        }
    }
    None
}

/// `{"tool_calls": [...]}`
fn wrapper_calls(value: &Value) -> Vec<ToolCall> {
    value
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(call_from_value).collect())
        .unwrap_or_default()
}

/// `[call, call, ...]`, only when every element is a call.
fn array_calls(value: &Value) -> Vec<ToolCall> {
    let Some(items) = value.as_array().filter(|a| !a.is_empty()) else {
        return Vec::new();
    };
    let calls: Vec<ToolCall> = items.iter().filter_map(call_from_value).collect();
    if calls.len() == items.len() {
        calls
    } else {
        Vec::new()
    }
}

fn object_call(value: &Value) -> Vec<ToolCall> {
    call_from_value(value).into_iter().collect()
}

/// Normalize one call object in any of the accepted shapes.
fn call_from_value(value: &Value) -> Option<ToolCall> {
    let obj = value.as_object()?;
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(String::from);

    if let Some(function) = obj.get("function").and_then(Value::as_object) {
        let name = non_empty_str(function, "name")?;
        let arguments = match function.get("arguments") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(raw) => arguments_from(raw)?,
        };
        return Some(build_call(id, name, arguments));
    }

    if let (Some(name), Some(raw)) = (non_empty_str(obj, "name"), obj.get("arguments")) {
        return Some(build_call(id, name, arguments_from(raw)?));
    }

    if let (Some(name), Some(raw)) = (non_empty_str(obj, "tool"), obj.get("parameters")) {
        return Some(build_call(id, name, arguments_from(raw)?));
    }

    None
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Arguments as an object, decoding (and repairing) string encodings.
fn arguments_from(raw: &Value) -> Option<Value> {
    let value = match raw {
        Value::String(s) => parse_arguments(s)?,
        other => other.clone(),
    };
    value.is_object().then_some(value)
}

fn build_call(id: Option<String>, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.unwrap_or_else(new_call_id),
        name: name.to_string(),
        arguments,
    }
}

fn looks_like_call(raw: &str) -> bool {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).take(40).collect();
    let inner = compact.strip_prefix('[').unwrap_or(&compact);
    CALL_MARKERS.iter().any(|m| inner.starts_with(m))
}

// ─── Pending Detection ──────────────────────────────────────────────────────

/// Byte offset where a trailing, unterminated call marker begins. Everything
/// from the marker on must still read as the start of a JSON document.
fn pending_cut(text: &str, unterminated: &[usize]) -> Option<usize> {
    for &pos in unterminated {
        let compact: String = text[pos..]
            .chars()
            .filter(|c| !c.is_whitespace())
            .take(24)
            .collect();
        let inner = compact.strip_prefix('[').unwrap_or(&compact);
        let is_marker = inner.is_empty()
            || CALL_MARKERS
                .iter()
                .any(|m| inner.starts_with(m) || m.starts_with(inner));
        if is_marker && is_json_prefix(&text[pos..]) {
            return Some(strip_open_fence(text, pos));
        }
    }

    // A fence opened at the very end, before any JSON arrived.
    let trimmed = text.trim_end();
    if trimmed.ends_with("```json") && trimmed.matches("```").count() % 2 == 1 {
        return Some(trimmed.len() - "```json".len());
    }
    None
}

#[derive(Clone, Copy, PartialEq)]
enum Expect {
    Value,
    ValueOrClose,
    KeyOrClose,
    Key,
    Colon,
    CommaOrClose,
    Done,
}

/// Whether more text could turn `s` into a complete JSON document.
fn is_json_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut expect = Expect::Value;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        match (expect, b) {
            (Expect::Done, _) => return false,
            (Expect::KeyOrClose, b'}') | (Expect::ValueOrClose | Expect::CommaOrClose, b']' | b'}') => {
                let open = if b == b'}' { b'{' } else { b'[' };
                if stack.pop() != Some(open) {
                    return false;
                }
                i += 1;
                expect = after_value(&stack);
            }
            (Expect::CommaOrClose, b',') => {
                i += 1;
                expect = if stack.last() == Some(&b'{') { Expect::Key } else { Expect::Value };
            }
            (Expect::KeyOrClose | Expect::Key, b'"') => match string_end(bytes, i) {
                Some(end) => {
                    i = end;
                    expect = Expect::Colon;
                }
                None => return true,
            },
            (Expect::Colon, b':') => {
                i += 1;
                expect = Expect::Value;
            }
            (Expect::Value | Expect::ValueOrClose, _) => {
                let end = match b {
                    b'{' => {
                        stack.push(b'{');
                        i += 1;
                        expect = Expect::KeyOrClose;
                        continue;
                    }
                    b'[' => {
                        stack.push(b'[');
                        i += 1;
                        expect = Expect::ValueOrClose;
                        continue;
                    }
                    b'"' => match string_end(bytes, i) {
                        Some(end) => end,
                        None => return true,
                    },
                    b'-' | b'0'..=b'9' => {
                        i + bytes[i..]
                            .iter()
                            .take_while(|c| matches!(c, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E'))
                            .count()
                    }
                    b'a'..=b'z' => {
                        let len = bytes[i..].iter().take_while(|c| c.is_ascii_alphabetic()).count();
                        let word = &s[i..i + len];
                        let at_end = i + len == bytes.len();
                        let known = ["true", "false", "null"]
                            .iter()
                            .any(|lit| *lit == word || (at_end && lit.starts_with(word)));
                        if !known {
                            return false;
                        }
                        i + len
                    }
                    _ => return false,
                };
                i = end;
                expect = after_value(&stack);
            }
            _ => return false,
        }
    }
    true
}

fn after_value(stack: &[u8]) -> Expect {
    if stack.is_empty() {
        Expect::Done
    } else {
        Expect::CommaOrClose
    }
}

/// Index just past the quote closing the string opened at `start`.
fn string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start + 1) {
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            return Some(i + 1);
        }
    }
    None
}

/// Move `pos` back over an opening ```` ```json ```` fence directly before it.
fn strip_open_fence(text: &str, pos: usize) -> usize {
    let before = text[..pos].trim_end();
    for fence in ["```json", "```JSON", "```"] {
        if let Some(rest) = before.strip_suffix(fence) {
            return rest.len();
        }
    }
    pos
}

// ─── Display Cleanup ────────────────────────────────────────────────────────

fn remove_spans(text: &str, spans: &[(usize, usize)]) -> String {
    if spans.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for &(start, end) in spans {
        let (start, end) = widen_to_fence(text, start, end);
        if start < cursor {
            continue;
        }
        out.push_str(&text[cursor..start]);
        cursor = end;
    }
    out.push_str(&text[cursor..]);

    collapse_blank_lines(&out).trim().to_string()
}

/// Include a surrounding code fence when the span sits alone inside one.
fn widen_to_fence(text: &str, start: usize, end: usize) -> (usize, usize) {
    let before = text[..start].trim_end();
    let after = &text[end..];
    let after_trimmed = after.trim_start();

    let open = ["```json", "```JSON", "```"]
        .iter()
        .find_map(|fence| before.strip_suffix(fence).map(str::len));
    match (open, after_trimmed.starts_with("```")) {
        (Some(open_at), true) => {
            let close_at = end + (after.len() - after_trimmed.len()) + 3;
            (open_at, close_at)
        }
        _ => (start, end),
    }
}

fn collapse_blank_lines(text: &str) -> String {
    static BLANK_RUNS: OnceLock<Option<Regex>> = OnceLock::new();
    match BLANK_RUNS
        .get_or_init(|| Regex::new(r"\n[ \t]*\n([ \t]*\n)+").ok())
        .as_ref()
    {
        Some(re) => re.replace_all(text, "\n\n").into_owned(),
        None => text.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn found(extraction: &Extraction) -> &[ToolCall] {
        match &extraction.outcome {
            ExtractionOutcome::Found(calls) => calls,
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_text_is_untouched() {
        let text = "The answer is 4.\n\n\n\nNothing else {to} say.";
        let extraction = extract(text, None);
        assert_eq!(extraction.outcome, ExtractionOutcome::NotFound);
        assert_eq!(extraction.display_text, text);
    }

    #[test]
    fn test_single_call_object() {
        let text = r#"Let me check. {"name": "web_search", "arguments": {"query": "rust 2024"}}"#;
        let extraction = extract(text, None);
        let calls = found(&extraction);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "web_search");
        assert_eq!(calls[0].arguments, json!({"query": "rust 2024"}));
        assert_eq!(extraction.display_text, "Let me check.");
    }

    #[test]
    fn test_wrapper_with_openai_shape_and_string_arguments() {
        let text = r#"{"tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "calculator", "arguments": "{\"expression\": \"2+2\",}"}}]}"#;
        let extraction = extract(text, None);
        let calls = found(&extraction);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments, json!({"expression": "2+2"}));
        assert_eq!(extraction.display_text, "");
    }

    #[test]
    fn test_bare_array_of_calls() {
        let text = r#"Running both:
[{"name": "calculator", "arguments": {"expression": "1+1"}}, {"tool": "web_search", "parameters": {"query": "x"}}]"#;
        let extraction = extract(text, None);
        let calls = found(&extraction);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].name, "web_search");
        assert_eq!(extraction.display_text, "Running both:");
    }

    #[test]
    fn test_wrapper_takes_priority_over_individual_objects() {
        let text = r#"{"tool_calls": [{"name": "a", "arguments": {}}]} and {"name": "b", "arguments": {}}"#;
        let extraction = extract(text, None);
        let calls = found(&extraction);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "a");
    }

    #[test]
    fn test_fenced_block_removed_without_residue() {
        let text = "Searching now.\n\n```json\n{\"name\": \"web_search\", \"arguments\": {\"query\": \"tokio\"}}\n```\n\n\n\nDone.";
        let extraction = extract(text, None);
        assert_eq!(found(&extraction).len(), 1);
        assert_eq!(extraction.display_text, "Searching now.\n\nDone.");
        assert!(!extraction.display_text.contains('{'));
        assert!(!extraction.display_text.contains("```"));
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scanning() {
        let text = r#"{"name": "run_code", "arguments": {"language": "javascript", "code": "if (a) { console.log('}') }"}}"#;
        let extraction = extract(text, None);
        let calls = found(&extraction);
        assert_eq!(calls[0].arguments["code"], "if (a) { console.log('}') }");
    }

    #[test]
    fn test_non_call_json_is_not_extracted() {
        let text = r#"Config looks like {"name": "bob", "age": 3}."#;
        let extraction = extract(text, None);
        assert_eq!(extraction.outcome, ExtractionOutcome::NotFound);
        assert_eq!(extraction.display_text, text);
    }

    #[test]
    fn test_malformed_json_is_not_found() {
        let text = r#"{"name": "web_search", "arguments": {"query": "x" oops}}"#;
        assert_eq!(extract(text, None).outcome, ExtractionOutcome::NotFound);
    }

    #[test]
    fn test_pending_trailing_marker() {
        let text = "I'll look that up.\n```json\n{\"name\": \"web_se";
        let extraction = extract(text, None);
        assert_eq!(extraction.outcome, ExtractionOutcome::Pending);
        assert_eq!(extraction.display_text, "I'll look that up.");
    }

    #[test]
    fn test_pending_on_marker_prefix() {
        for text in ["Sure {\"too", "Sure [{\"type\": \"func", "Sure {"] {
            let extraction = extract(text, None);
            assert_eq!(extraction.outcome, ExtractionOutcome::Pending, "{text}");
            assert_eq!(extraction.display_text, "Sure");
        }
    }

    #[test]
    fn test_unterminated_non_marker_is_not_pending() {
        let text = "The set {1, 2";
        assert_eq!(extract(text, None).outcome, ExtractionOutcome::NotFound);
    }

    #[test]
    fn test_prose_after_a_marker_is_not_pending() {
        let text = "Set the field {\"name\" to your username. Then press save and you are done.";
        let extraction = extract(text, None);
        assert_eq!(extraction.outcome, ExtractionOutcome::NotFound);
        assert_eq!(extraction.display_text, text);
    }

    #[test]
    fn test_json_prefix_recognition() {
        for prefix in [
            "{",
            "{\"name\": \"web_search\", \"arguments\": {\"query\": \"ru",
            "[{\"tool\": \"calculator\", \"parameters\": {\"n\": -1.5e3, \"ok\": tr",
            "{\"tool_calls\": [{\"function\": {\"name\": \"x\"}}, ",
        ] {
            assert!(is_json_prefix(prefix), "{prefix}");
        }
        for not_json in [
            "{\"name\" to your username",
            "{\"name\": web_search",
            "{\"name\": \"a\"} and more",
            "{\"name\": \"a\"]",
        ] {
            assert!(!is_json_prefix(not_json), "{not_json}");
        }
    }

    #[test]
    fn test_native_calls_win_and_text_is_cleaned() {
        let native = vec![ToolCall::new("calculator", json!({"expression": "3*3"}))];
        let text = r#"Computing {"name": "calculator", "arguments": {"expression": "3*3"}}"#;
        let extraction = extract(text, Some(&native));
        assert_eq!(found(&extraction), native.as_slice());
        assert_eq!(extraction.display_text, "Computing");
    }
}
