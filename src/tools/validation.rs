//! Argument validation for each allow-listed tool.
//!
//! Runs before any I/O. Every failure names the offending field.

use serde_json::{Map, Value};

use super::calculator::Operation;
use super::errors::ToolError;
use super::sandbox::Language;
use super::ToolName;
use crate::config::ToolsConfig;

const MAX_SEARCH_QUERY_CHARS: usize = 500;
const MAX_SEARCH_QUERY_WORDS: usize = 50;
const MAX_SEARCH_RESULTS: u64 = 10;
const MAX_EXPRESSION_CHARS: usize = 1_000;
const MAX_CODE_CHARS: usize = 10_000;
const MAX_GROUNDED_QUERY_CHARS: usize = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchArgs {
    pub query: String,
    pub num_results: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalculatorArgs {
    pub expression: String,
    pub operation: Operation,
    pub variable: Option<char>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeArgs {
    pub language: Language,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundedArgs {
    pub query: String,
    pub research_mode: bool,
    pub include_citations: bool,
    pub extract_entities: bool,
}

/// Arguments after validation, typed per tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    Search(SearchArgs),
    Calculator(CalculatorArgs),
    Code(CodeArgs),
    Grounded(GroundedArgs),
}

pub fn validate(tool: ToolName, arguments: &Value, config: &ToolsConfig) -> Result<ToolArgs, ToolError> {
    let obj = arguments
        .as_object()
        .ok_or_else(|| ToolError::invalid("arguments", "must be a JSON object"))?;

    match tool {
        ToolName::WebSearch => validate_search(obj, config).map(ToolArgs::Search),
        ToolName::Calculator => validate_calculator(obj).map(ToolArgs::Calculator),
        ToolName::RunCode => validate_code(obj, config).map(ToolArgs::Code),
        ToolName::GroundedAnswer => validate_grounded(obj).map(ToolArgs::Grounded),
    }
}

fn validate_search(obj: &Map<String, Value>, config: &ToolsConfig) -> Result<SearchArgs, ToolError> {
    let query = bounded_text(obj, "query", MAX_SEARCH_QUERY_CHARS)?;
    let words = query.split_whitespace().count();
    if words > MAX_SEARCH_QUERY_WORDS {
        return Err(ToolError::invalid(
            "query",
            format!("must be at most {MAX_SEARCH_QUERY_WORDS} words, got {words}"),
        ));
    }

    let num_results = match obj.get("num_results") {
        None | Some(Value::Null) => config.search.default_results,
        Some(v) => {
            let n = as_integer(v).ok_or_else(|| {
                ToolError::invalid("num_results", "must be an integer")
            })?;
            if !(1..=MAX_SEARCH_RESULTS as i64).contains(&n) {
                return Err(ToolError::invalid(
                    "num_results",
                    format!("must be between 1 and {MAX_SEARCH_RESULTS}, got {n}"),
                ));
            }
            n as u32
        }
    };

    Ok(SearchArgs { query, num_results })
}

fn validate_calculator(obj: &Map<String, Value>) -> Result<CalculatorArgs, ToolError> {
    let expression = bounded_text(obj, "expression", MAX_EXPRESSION_CHARS)?;

    let operation = match obj.get("operation") {
        None | Some(Value::Null) => Operation::Evaluate,
        Some(Value::String(s)) => Operation::parse(s).ok_or_else(|| {
            ToolError::invalid(
                "operation",
                format!("unsupported operation '{s}'; expected evaluate, solve, simplify, derivative or integral"),
            )
        })?,
        Some(_) => return Err(ToolError::invalid("operation", "must be a string")),
    };

    let variable = match obj.get("variable") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let s = s.trim();
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => Some(c),
                _ => {
                    return Err(ToolError::invalid(
                        "variable",
                        "must be a single ASCII letter",
                    ))
                }
            }
        }
        Some(_) => return Err(ToolError::invalid("variable", "must be a string")),
    };

    Ok(CalculatorArgs {
        expression,
        operation,
        variable,
    })
}

fn validate_code(obj: &Map<String, Value>, config: &ToolsConfig) -> Result<CodeArgs, ToolError> {
    let raw_language = required_str(obj, "language")?;
    let language = Language::parse(raw_language)
        .filter(|lang| {
            config
                .code
                .languages
                .iter()
                .any(|allowed| Language::parse(allowed) == Some(*lang))
        })
        .ok_or_else(|| {
            ToolError::invalid(
                "language",
                format!(
                    "'{raw_language}' is not allowed; expected one of: {}",
                    config.code.languages.join(", ")
                ),
            )
        })?;

    let code = required_str(obj, "code")?;
    let chars = code.chars().count();
    if code.trim().is_empty() {
        return Err(ToolError::invalid("code", "must not be empty"));
    }
    if chars > MAX_CODE_CHARS {
        return Err(ToolError::invalid(
            "code",
            format!("must be at most {MAX_CODE_CHARS} characters, got {chars}"),
        ));
    }

    Ok(CodeArgs {
        language,
        code: code.to_string(),
    })
}

fn validate_grounded(obj: &Map<String, Value>) -> Result<GroundedArgs, ToolError> {
    Ok(GroundedArgs {
        query: bounded_text(obj, "query", MAX_GROUNDED_QUERY_CHARS)?,
        research_mode: optional_bool(obj, "research_mode", false)?,
        include_citations: optional_bool(obj, "include_citations", true)?,
        extract_entities: optional_bool(obj, "extract_entities", false)?,
    })
}

// ─── Field helpers ───────────────────────────────────────────────────────────

fn required_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str, ToolError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s),
        None | Some(Value::Null) => Err(ToolError::invalid(field, "is required")),
        Some(_) => Err(ToolError::invalid(field, "must be a string")),
    }
}

/// Trimmed string of 1..=`max_chars` characters.
fn bounded_text(obj: &Map<String, Value>, field: &str, max_chars: usize) -> Result<String, ToolError> {
    let value = required_str(obj, field)?.trim();
    if value.is_empty() {
        return Err(ToolError::invalid(field, "must not be empty"));
    }
    let chars = value.chars().count();
    if chars > max_chars {
        return Err(ToolError::invalid(
            field,
            format!("must be at most {max_chars} characters, got {chars}"),
        ));
    }
    Ok(value.to_string())
}

/// Booleans arrive as strings often enough to accept `"true"` / `"false"`.
fn optional_bool(obj: &Map<String, Value>, field: &str, default: bool) -> Result<bool, ToolError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
        Some(_) => Err(ToolError::invalid(field, "must be a boolean")),
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ToolsConfig {
        ToolsConfig::default()
    }

    fn field_of(err: ToolError) -> String {
        match err {
            ToolError::InvalidArgument { field, .. } => field,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_search_defaults() {
        let args = validate(ToolName::WebSearch, &json!({"query": "  rust  "}), &config()).unwrap();
        assert_eq!(
            args,
            ToolArgs::Search(SearchArgs {
                query: "rust".into(),
                num_results: 5
            })
        );
    }

    #[test]
    fn test_search_empty_query_rejected() {
        let err = validate(ToolName::WebSearch, &json!({"query": "   "}), &config()).unwrap_err();
        assert_eq!(field_of(err), "query");
    }

    #[test]
    fn test_search_query_word_limit() {
        let query = vec!["word"; 51].join(" ");
        let err = validate(ToolName::WebSearch, &json!({"query": query}), &config()).unwrap_err();
        assert_eq!(field_of(err), "query");
    }

    #[test]
    fn test_search_num_results_bounds() {
        let err = validate(
            ToolName::WebSearch,
            &json!({"query": "rust", "num_results": 11}),
            &config(),
        )
        .unwrap_err();
        assert_eq!(field_of(err), "num_results");

        let args = validate(
            ToolName::WebSearch,
            &json!({"query": "rust", "num_results": "3"}),
            &config(),
        )
        .unwrap();
        assert!(matches!(args, ToolArgs::Search(SearchArgs { num_results: 3, .. })));
    }

    #[test]
    fn test_calculator_operation_and_variable() {
        let args = validate(
            ToolName::Calculator,
            &json!({"expression": "2x + 3 = 7", "operation": "solve", "variable": "x"}),
            &config(),
        )
        .unwrap();
        assert_eq!(
            args,
            ToolArgs::Calculator(CalculatorArgs {
                expression: "2x + 3 = 7".into(),
                operation: Operation::Solve,
                variable: Some('x'),
            })
        );

        let err = validate(
            ToolName::Calculator,
            &json!({"expression": "1", "operation": "factor"}),
            &config(),
        )
        .unwrap_err();
        assert_eq!(field_of(err), "operation");

        let err = validate(
            ToolName::Calculator,
            &json!({"expression": "1", "variable": "xy"}),
            &config(),
        )
        .unwrap_err();
        assert_eq!(field_of(err), "variable");
    }

    #[test]
    fn test_code_language_allow_list() {
        let args = validate(
            ToolName::RunCode,
            &json!({"language": "JS", "code": "console.log(1)"}),
            &config(),
        )
        .unwrap();
        assert!(matches!(
            args,
            ToolArgs::Code(CodeArgs {
                language: Language::JavaScript,
                ..
            })
        ));

        let err = validate(
            ToolName::RunCode,
            &json!({"language": "ruby", "code": "puts 1"}),
            &config(),
        )
        .unwrap_err();
        assert_eq!(field_of(err), "language");

        let mut restricted = config();
        restricted.code.languages = vec!["python".into()];
        let err = validate(
            ToolName::RunCode,
            &json!({"language": "javascript", "code": "1"}),
            &restricted,
        )
        .unwrap_err();
        assert_eq!(field_of(err), "language");
    }

    #[test]
    fn test_code_length_limit() {
        let code = "1".repeat(MAX_CODE_CHARS + 1);
        let err = validate(
            ToolName::RunCode,
            &json!({"language": "python", "code": code}),
            &config(),
        )
        .unwrap_err();
        assert_eq!(field_of(err), "code");
    }

    #[test]
    fn test_grounded_flag_defaults() {
        let args = validate(
            ToolName::GroundedAnswer,
            &json!({"query": "who won", "research_mode": "true"}),
            &config(),
        )
        .unwrap();
        assert_eq!(
            args,
            ToolArgs::Grounded(GroundedArgs {
                query: "who won".into(),
                research_mode: true,
                include_citations: true,
                extract_entities: false,
            })
        );
    }

    #[test]
    fn test_arguments_must_be_object() {
        let err = validate(ToolName::Calculator, &json!("2+2"), &config()).unwrap_err();
        assert_eq!(field_of(err), "arguments");
    }
}
