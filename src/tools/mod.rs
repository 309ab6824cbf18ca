//! Allow-listed tools and their dispatch.
//!
//! - `ToolName`: the allow-list plus the aliases models tend to invent
//! - `validation`: typed argument checks, run before any I/O
//! - `dispatcher`: timeout-bounded execution producing a `ToolResult`
//! - `search`, `calculator`, `sandbox`, `grounded`: the tools themselves

pub mod calculator;
pub mod dispatcher;
pub mod errors;
pub mod expr;
pub mod grounded;
pub mod sandbox;
pub mod search;
pub mod validation;

use std::fmt;

use serde_json::json;

use crate::inference::types::{FunctionDefinition, ToolDefinition};

pub use dispatcher::{ToolDispatcher, ToolResult};
pub use errors::{ToolError, ToolErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    WebSearch,
    Calculator,
    RunCode,
    GroundedAnswer,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::WebSearch,
        ToolName::Calculator,
        ToolName::RunCode,
        ToolName::GroundedAnswer,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "web_search" | "search" => Some(Self::WebSearch),
            "calculator" | "calculate" | "calc" => Some(Self::Calculator),
            "run_code" | "execute_code" | "code_execution" => Some(Self::RunCode),
            "grounded_answer" | "grounded_search" | "ask" => Some(Self::GroundedAnswer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::Calculator => "calculator",
            Self::RunCode => "run_code",
            Self::GroundedAnswer => "grounded_answer",
        }
    }

    /// OpenAI function schema advertised to the model.
    pub fn definition(&self) -> ToolDefinition {
        let (description, parameters) = match self {
            Self::WebSearch => (
                "Search the web for current information. Returns titles, URLs and snippets.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Search query (max 50 words)"},
                        "num_results": {"type": "integer", "minimum": 1, "maximum": 10},
                    },
                    "required": ["query"],
                }),
            ),
            Self::Calculator => (
                "Evaluate arithmetic expressions or solve linear equations in one variable.",
                json!({
                    "type": "object",
                    "properties": {
                        "expression": {"type": "string", "description": "e.g. \"2 + 2\" or \"2x + 3 = 7\""},
                        "operation": {
                            "type": "string",
                            "enum": ["evaluate", "solve", "simplify", "derivative", "integral"],
                        },
                        "variable": {"type": "string", "description": "Variable to solve for"},
                    },
                    "required": ["expression"],
                }),
            ),
            Self::RunCode => (
                "Run a short JavaScript or Python snippet in a sandbox with no network or \
                 filesystem access. Returns printed output and the value of the last expression.",
                json!({
                    "type": "object",
                    "properties": {
                        "language": {"type": "string", "enum": ["javascript", "python"]},
                        "code": {"type": "string"},
                    },
                    "required": ["language", "code"],
                }),
            ),
            Self::GroundedAnswer => (
                "Answer a factual question with cited sources.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "research_mode": {"type": "boolean", "description": "Deeper, slower research"},
                        "include_citations": {"type": "boolean"},
                        "extract_entities": {"type": "boolean"},
                    },
                    "required": ["query"],
                }),
            ),
        };

        ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: self.as_str().to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(ToolName::parse("search"), Some(ToolName::WebSearch));
        assert_eq!(ToolName::parse("Calc"), Some(ToolName::Calculator));
        assert_eq!(ToolName::parse("code_execution"), Some(ToolName::RunCode));
        assert_eq!(ToolName::parse("ask"), Some(ToolName::GroundedAnswer));
        assert_eq!(ToolName::parse("rm"), None);
    }

    #[test]
    fn test_canonical_names_round_trip() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::parse(tool.as_str()), Some(tool));
            assert_eq!(tool.definition().function.name, tool.as_str());
        }
    }
}
