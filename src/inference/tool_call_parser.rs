//! Native tool call decoding and malformed-argument repair.
//!
//! OpenAI-style tool calls carry their arguments as a JSON-encoded string.
//! Models regularly get that string slightly wrong, so decoding goes through
//! [`repair_malformed_tool_call_json`] before giving up.

use super::errors::InferenceError;
use super::types::{new_call_id, ToolCall};

/// Build a `ToolCall` from the accumulated name and argument string of a
/// native call.
pub fn parse_native_json_tool_call(
    id: Option<&str>,
    name: &str,
    arguments_json: &str,
) -> Result<ToolCall, InferenceError> {
    let call_id = id.map(String::from).unwrap_or_else(new_call_id);

    if name.trim().is_empty() {
        return Err(InferenceError::ToolCallParseError {
            raw_response: arguments_json.to_string(),
            reason: "empty tool name".into(),
        });
    }

    let arguments = match parse_arguments(arguments_json) {
        Some(value) if value.is_object() => value,
        Some(_) => {
            return Err(InferenceError::ToolCallParseError {
                raw_response: arguments_json.to_string(),
                reason: "arguments are not a JSON object".into(),
            })
        }
        None => {
            return Err(InferenceError::ToolCallParseError {
                raw_response: arguments_json.to_string(),
                reason: "invalid JSON arguments".into(),
            })
        }
    };

    Ok(ToolCall {
        id: call_id,
        name: name.trim().to_string(),
        arguments,
    })
}

/// Decode a JSON argument string, repairing it if needed.
///
/// An empty string means "no arguments" and yields `{}`.
pub fn parse_arguments(raw: &str) -> Option<serde_json::Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(serde_json::Value::Object(serde_json::Map::new()));
    }
    repair_malformed_tool_call_json(raw)
}

// ─── Malformed JSON Repair ──────────────────────────────────────────────────

/// Attempt to repair malformed JSON arguments from a model tool call.
///
/// Repairs, applied cumulatively until one parses:
/// 1. Doubled opening quote on a value: `"key":""value"`
/// 2. Trailing commas: `{"a":1,}`
/// 3. Missing closing braces
/// 4. Unescaped control characters
pub fn repair_malformed_tool_call_json(raw: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(raw) {
        return Some(v);
    }

    let mut repaired = repair_double_quotes(raw);
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&repaired) {
        return Some(v);
    }

    repaired = repair_trailing_commas(&repaired);
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&repaired) {
        return Some(v);
    }

    repaired = repair_unbalanced_braces(&repaired);
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&repaired) {
        return Some(v);
    }

    repaired = repair_control_characters(&repaired);
    serde_json::from_str::<serde_json::Value>(&repaired).ok()
}

/// Collapse `:""value` to `:"value"` unless it is a legitimate empty string.
fn repair_double_quotes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if i + 3 < bytes.len()
            && bytes[i] == b':'
            && bytes[i + 1] == b'"'
            && bytes[i + 2] == b'"'
            && bytes[i + 3] != b','
            && bytes[i + 3] != b'}'
        {
            result.push(b':');
            result.push(b'"');
            i += 3;
            continue;
        }
        result.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(result).unwrap_or_else(|_| input.to_string())
}

/// Remove trailing commas before `}` or `]`.
fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());

    for (i, &c) in chars.iter().enumerate() {
        if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        result.push(c);
    }

    result
}

/// Append closing braces to balance unmatched opening braces.
fn repair_unbalanced_braces(input: &str) -> String {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    let mut result = input.to_string();
    if in_string {
        result.push('"');
    }
    for _ in 0..depth.max(0) {
        result.push('}');
    }
    result
}

/// Drop control characters other than `\n`, `\r`, `\t`.
fn repair_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_native_json_valid() {
        let result =
            parse_native_json_tool_call(Some("call_123"), "web_search", r#"{"query": "rust"}"#)
                .unwrap();
        assert_eq!(result.id, "call_123");
        assert_eq!(result.name, "web_search");
        assert_eq!(result.arguments["query"], "rust");
    }

    #[test]
    fn test_parse_native_json_generates_id() {
        let result = parse_native_json_tool_call(None, "calculator", r#"{}"#).unwrap();
        assert!(result.id.starts_with("call_"));
    }

    #[test]
    fn test_parse_native_json_empty_name() {
        assert!(parse_native_json_tool_call(None, "", r#"{}"#).is_err());
    }

    #[test]
    fn test_parse_native_json_empty_arguments_is_empty_object() {
        let result = parse_native_json_tool_call(None, "calculator", "").unwrap();
        assert_eq!(result.arguments, serde_json::json!({}));
    }

    #[test]
    fn test_parse_native_json_invalid_json() {
        let result = parse_native_json_tool_call(None, "calculator", "not json");
        assert!(matches!(
            result,
            Err(InferenceError::ToolCallParseError { .. })
        ));
    }

    #[test]
    fn test_parse_native_json_rejects_non_object_arguments() {
        for raw in ["[1, 2]", "\"x\"", "42", "null"] {
            let result = parse_native_json_tool_call(None, "calculator", raw);
            assert!(
                matches!(result, Err(InferenceError::ToolCallParseError { .. })),
                "{raw}"
            );
        }
    }

    #[test]
    fn test_repair_double_quote() {
        let raw = r#"{"query":""capital of France","num_results":3}"#;
        let v = repair_malformed_tool_call_json(raw).unwrap();
        assert_eq!(v["query"], "capital of France");
        assert_eq!(v["num_results"], 3);
    }

    #[test]
    fn test_repair_keeps_legitimate_empty_string() {
        let raw = r#"{"a":"","b":1,}"#;
        let v = repair_malformed_tool_call_json(raw).unwrap();
        assert_eq!(v["a"], "");
        assert_eq!(v["b"], 1);
    }

    #[test]
    fn test_repair_trailing_comma() {
        let raw = r#"{"expression": "2+2", "operation": "evaluate",}"#;
        assert_eq!(
            repair_malformed_tool_call_json(raw).unwrap()["operation"],
            "evaluate"
        );
    }

    #[test]
    fn test_repair_missing_closing_brace() {
        let raw = r#"{"query": "rust", "num_results": 5"#;
        assert_eq!(repair_malformed_tool_call_json(raw).unwrap()["query"], "rust");
    }

    #[test]
    fn test_repair_unterminated_string() {
        let raw = r#"{"query": "rust"#;
        assert_eq!(repair_malformed_tool_call_json(raw).unwrap()["query"], "rust");
    }

    #[test]
    fn test_repair_irreparable() {
        assert!(repair_malformed_tool_call_json("this is not json at all").is_none());
    }
}
