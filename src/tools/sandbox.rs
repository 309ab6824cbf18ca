//! Restricted code execution for small JavaScript and Python snippets.
//!
//! Programs run on the expression engine in [`super::expr`], not on a real
//! language runtime. The only side effect available to a program is
//! printing; any function outside the builtin table is a `ReferenceError`.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value as Json};

use super::errors::ToolError;
use super::expr::{
    call_math, constant, eval, parse_program, Dialect, Env, ExprError, Stmt, Value,
    MAX_STRING_LEN,
};

/// Maximum statements executed per program.
const MAX_STATEMENTS: usize = 200;

/// Maximum captured output, in bytes.
const MAX_OUTPUT_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    JavaScript,
    Python,
}

impl Language {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" | "node" | "nodejs" => Some(Self::JavaScript),
            "python" | "py" | "python3" => Some(Self::Python),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::Python => "python",
        }
    }

    fn dialect(&self) -> Dialect {
        match self {
            Self::JavaScript => Dialect::JavaScript,
            Self::Python => Dialect::Python,
        }
    }
}

/// Captured result of one program run.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub stdout: String,
    /// Display form of the last expression statement, unless it was a print.
    pub result: Option<String>,
    pub truncated: bool,
}

/// Run a program on a blocking thread, bounded by `timeout`.
pub async fn run(language: Language, code: &str, timeout: Duration) -> Result<Json, ToolError> {
    let source = code.to_string();
    let task = tokio::task::spawn_blocking(move || execute(language, &source));

    let execution = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_err)) => {
            return Err(ToolError::execution(format!(
                "code runner failed: {join_err}"
            )))
        }
        Err(_) => {
            return Err(ToolError::Timeout {
                tool: "run_code".into(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };

    Ok(json!({
        "language": language.as_str(),
        "stdout": execution.stdout,
        "result": execution.result,
        "truncated": execution.truncated,
    }))
}

/// Parse and run a program synchronously.
pub fn execute(language: Language, code: &str) -> Result<Execution, ToolError> {
    let program = parse_program(code).map_err(|e| runtime_error(language, &e))?;
    if program.len() > MAX_STATEMENTS {
        return Err(ToolError::execution(format!(
            "RangeError: program has more than {MAX_STATEMENTS} statements"
        )));
    }

    let mut env = SandboxEnv::new(language);
    let mut last = None;

    for stmt in &program {
        last = None;
        match stmt {
            Stmt::Assign { name, value } => {
                let v = eval(value, &mut env).map_err(|e| runtime_error(language, &e))?;
                env.vars.insert(name.clone(), v);
            }
            Stmt::Import { module } => {
                if language != Language::Python || module != "math" {
                    return Err(ToolError::execution(match language {
                        Language::Python => {
                            format!("ModuleNotFoundError: No module named '{module}'")
                        }
                        Language::JavaScript => {
                            "SyntaxError: import statements are not supported".to_string()
                        }
                    }));
                }
            }
            Stmt::Expr(expr) => {
                let printed_before = env.print_calls;
                let v = eval(expr, &mut env).map_err(|e| runtime_error(language, &e))?;
                if env.print_calls == printed_before && v != Value::Null {
                    last = Some(v.display(language.dialect()));
                }
            }
        }
    }

    Ok(Execution {
        stdout: env.stdout,
        result: last,
        truncated: env.truncated,
    })
}

/// Prefix an engine error with the error class each language would raise.
fn runtime_error(language: Language, err: &ExprError) -> ToolError {
    let class = match (err, language) {
        (ExprError::Syntax { .. }, _) => "SyntaxError",
        (ExprError::UnknownName { .. }, Language::JavaScript) => "ReferenceError",
        (ExprError::UnknownName { .. }, Language::Python) => "NameError",
        (ExprError::Type { .. }, _) => "TypeError",
        (ExprError::Math { .. }, Language::Python) => "ZeroDivisionError",
        (ExprError::Math { .. }, Language::JavaScript) => "RangeError",
        (ExprError::Limit { .. }, _) => "RangeError",
    };
    let class = match (class, err) {
        ("ZeroDivisionError", ExprError::Math { message }) if !message.contains("by zero") => {
            "ValueError"
        }
        (class, _) => class,
    };
    ToolError::execution(format!("{class}: {err}"))
}

struct SandboxEnv {
    language: Language,
    vars: HashMap<String, Value>,
    stdout: String,
    truncated: bool,
    print_calls: usize,
}

impl SandboxEnv {
    fn new(language: Language) -> Self {
        Self {
            language,
            vars: HashMap::new(),
            stdout: String::new(),
            truncated: false,
            print_calls: 0,
        }
    }

    fn print(&mut self, args: &[Value]) {
        self.print_calls += 1;
        if self.truncated {
            return;
        }
        let dialect = self.language.dialect();
        let line = args
            .iter()
            .map(|a| a.display(dialect))
            .collect::<Vec<_>>()
            .join(" ");

        let remaining = MAX_OUTPUT_BYTES.saturating_sub(self.stdout.len());
        if line.len() + 1 > remaining {
            self.stdout
                .push_str(crate::tokens::truncate_utf8(&line, remaining));
            self.truncated = true;
            return;
        }
        self.stdout.push_str(&line);
        self.stdout.push('\n');
    }

    fn is_print(&self, name: &str) -> bool {
        match self.language {
            Language::JavaScript => {
                matches!(name, "console.log" | "console.info" | "console.warn" | "console.error")
            }
            Language::Python => name == "print",
        }
    }
}

impl Env for SandboxEnv {
    fn dialect(&self) -> Dialect {
        self.language.dialect()
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.get(name) {
            return Some(v.clone());
        }
        // Only the namespaced constants exist in real programs.
        let namespaced = match self.language {
            Language::JavaScript => name.starts_with("Math."),
            Language::Python => name.starts_with("math."),
        };
        if namespaced {
            return constant(name).map(Value::Num);
        }
        None
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
        if self.is_print(name) {
            self.print(&args);
            return Ok(Value::Null);
        }

        let dialect = self.language.dialect();
        let single = |args: &[Value]| -> Result<Value, ExprError> {
            match args {
                [only] => Ok(only.clone()),
                _ => Err(ExprError::Type {
                    message: format!("{name}() takes exactly one argument ({} given)", args.len()),
                }),
            }
        };

        match (self.language, name) {
            (Language::Python, "len") => match single(&args)? {
                Value::Str(s) => Ok(Value::Num(s.chars().count() as f64)),
                other => Err(ExprError::Type {
                    message: format!("object of type '{}' has no len()", other.type_name(dialect)),
                }),
            },
            (Language::Python, "str") | (Language::JavaScript, "String") => {
                let s = single(&args)?.display(dialect);
                if s.chars().count() > MAX_STRING_LEN {
                    return Err(ExprError::Limit {
                        message: format!("string longer than {MAX_STRING_LEN} characters"),
                    });
                }
                Ok(Value::Str(s))
            }
            (Language::Python, "float") | (Language::JavaScript, "Number" | "parseFloat") => {
                to_number(single(&args)?, dialect).map(Value::Num)
            }
            (Language::Python, "int") | (Language::JavaScript, "parseInt") => {
                to_number(single(&args)?, dialect).map(|n| Value::Num(n.trunc()))
            }
            (Language::Python, "abs" | "round" | "min" | "max" | "pow") => {
                call_math(name, &args).unwrap_or_else(|| unknown(name))
            }
            (Language::JavaScript, _) if name.starts_with("Math.") => {
                call_math(name, &args).unwrap_or_else(|| unknown(name))
            }
            (Language::Python, _) if name.starts_with("math.") => {
                call_math(name, &args).unwrap_or_else(|| unknown(name))
            }
            _ => unknown(name),
        }
    }
}

fn unknown(name: &str) -> Result<Value, ExprError> {
    Err(ExprError::UnknownName {
        name: name.to_string(),
    })
}

fn to_number(value: Value, dialect: Dialect) -> Result<f64, ExprError> {
    match value {
        Value::Str(s) => s.trim().parse::<f64>().map_err(|_| ExprError::Type {
            message: format!("could not convert string to number: '{s}'"),
        }),
        Value::Null => Err(ExprError::Type {
            message: format!(
                "cannot convert {} to a number",
                Value::Null.display(dialect)
            ),
        }),
        other => other.as_number(),
    }
}
