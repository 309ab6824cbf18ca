//! Calculator tool: arithmetic evaluation and linear equation solving.

use std::collections::HashMap;

use serde_json::{json, Value as Json};

use super::errors::ToolError;
use super::expr::{
    call_math, constant, eval, format_number, free_variables, number_to_json, parse_expression,
    Dialect, Env, Expr, ExprError, Value,
};
use super::validation::CalculatorArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Evaluate,
    Solve,
    Simplify,
    Derivative,
    Integral,
}

impl Operation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evaluate" | "eval" | "calculate" => Some(Self::Evaluate),
            "solve" => Some(Self::Solve),
            "simplify" => Some(Self::Simplify),
            "derivative" | "differentiate" => Some(Self::Derivative),
            "integral" | "integrate" => Some(Self::Integral),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evaluate => "evaluate",
            Self::Solve => "solve",
            Self::Simplify => "simplify",
            Self::Derivative => "derivative",
            Self::Integral => "integral",
        }
    }
}

/// Run a validated calculator call.
pub fn run(args: &CalculatorArgs) -> Result<Json, ToolError> {
    match args.operation {
        Operation::Evaluate => {
            let value = evaluate(&args.expression)?;
            Ok(json!({
                "expression": args.expression,
                "operation": "evaluate",
                "result": number_to_json(value),
                "formatted": format_number(value),
            }))
        }
        Operation::Solve => {
            let (variable, solution) = solve(&args.expression, args.variable)?;
            Ok(json!({
                "expression": args.expression,
                "operation": "solve",
                "variable": variable,
                "solution": number_to_json(solution),
                "result": format!("{variable} = {}", format_number(solution)),
            }))
        }
        other => Err(ToolError::NotImplemented {
            operation: other.as_str().to_string(),
        }),
    }
}

/// Evaluate an arithmetic expression to a finite number.
pub fn evaluate(expression: &str) -> Result<f64, ToolError> {
    let expr = parse_expression(expression, true).map_err(expression_error)?;
    eval_number(&expr, &HashMap::new()).map_err(expression_error)
}

/// Solve a linear equation in one variable.
///
/// Without `=`, the expression is taken to equal zero. The left side minus
/// the right side is sampled to recover `a·v + b`; the samples must agree on
/// a single line, otherwise the equation is rejected as non-linear.
pub fn solve(equation: &str, variable: Option<char>) -> Result<(String, f64), ToolError> {
    let (lhs_src, rhs_src) = split_equation(equation)?;
    let lhs = parse_expression(lhs_src, true).map_err(expression_error)?;
    let rhs = parse_expression(rhs_src, true).map_err(expression_error)?;

    let mut names = free_variables(&lhs);
    names.extend(free_variables(&rhs));

    let variable = match variable {
        Some(c) => c.to_string(),
        None => {
            let mut iter = names.iter();
            match (iter.next(), iter.next()) {
                (Some(only), None) => only.clone(),
                (None, _) => {
                    return Err(ToolError::invalid("expression", "no variable to solve for"))
                }
                _ => {
                    return Err(ToolError::invalid(
                        "variable",
                        "expression has several variables; name the one to solve for",
                    ))
                }
            }
        }
    };
    if let Some(other) = names.iter().find(|n| **n != variable) {
        return Err(ToolError::invalid(
            "expression",
            format!("unknown variable '{other}'"),
        ));
    }

    let f = |t: f64| -> Result<f64, ToolError> {
        let bindings = HashMap::from([(variable.clone(), t)]);
        let l = eval_number(&lhs, &bindings);
        let r = eval_number(&rhs, &bindings);
        match (l, r) {
            (Ok(l), Ok(r)) => Ok(l - r),
            (Err(e), _) | (_, Err(e)) => Err(ToolError::execution(format!(
                "cannot solve for {variable}: {e}"
            ))),
        }
    };

    let f1 = f(1.0)?;
    let f2 = f(2.0)?;
    let slope = f2 - f1;
    let intercept = f1 - slope;

    for t in [3.0, -2.0, 7.5] {
        let actual = f(t)?;
        let expected = intercept + slope * t;
        let tolerance = 1e-9 * (1.0 + actual.abs().max(expected.abs()));
        if (actual - expected).abs() > tolerance {
            return Err(ToolError::execution(format!(
                "equation is not linear in {variable}; only linear equations can be solved"
            )));
        }
    }

    if slope.abs() < 1e-12 {
        return Err(ToolError::execution(if intercept.abs() < 1e-12 {
            format!("equation holds for every value of {variable}")
        } else {
            "equation has no solution".to_string()
        }));
    }

    Ok((variable, -intercept / slope))
}

/// Split on the single `=` that is not part of `==`, `<=`, `>=`, `!=`.
fn split_equation(equation: &str) -> Result<(&str, &str), ToolError> {
    let bytes = equation.as_bytes();
    let positions: Vec<usize> = (0..bytes.len())
        .filter(|&i| {
            bytes[i] == b'='
                && !matches!(i.checked_sub(1).map(|p| bytes[p]), Some(b'=' | b'<' | b'>' | b'!'))
                && bytes.get(i + 1) != Some(&b'=')
        })
        .collect();

    match positions.as_slice() {
        [] => Ok((equation, "0")),
        [i] => {
            let (lhs, rhs) = (&equation[..*i], &equation[i + 1..]);
            if lhs.trim().is_empty() || rhs.trim().is_empty() {
                return Err(ToolError::invalid("expression", "equation has an empty side"));
            }
            Ok((lhs, rhs))
        }
        _ => Err(ToolError::invalid("expression", "equation has more than one '='")),
    }
}

fn eval_number(expr: &Expr, bindings: &HashMap<String, f64>) -> Result<f64, ExprError> {
    let mut env = CalcEnv { bindings };
    match eval(expr, &mut env)? {
        Value::Num(n) => Ok(n),
        other => Err(ExprError::Type {
            message: format!(
                "expression produced a {} instead of a number",
                other.type_name(Dialect::JavaScript)
            ),
        }),
    }
}

fn expression_error(err: ExprError) -> ToolError {
    match err {
        ExprError::Syntax { .. } | ExprError::Limit { .. } => {
            ToolError::invalid("expression", err.to_string())
        }
        ExprError::UnknownName { name } => {
            ToolError::invalid("expression", format!("unknown name '{name}'"))
        }
        other => ToolError::execution(other.to_string()),
    }
}

struct CalcEnv<'a> {
    bindings: &'a HashMap<String, f64>,
}

impl Env for CalcEnv<'_> {
    fn dialect(&self) -> Dialect {
        Dialect::JavaScript
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.bindings
            .get(name)
            .copied()
            .or_else(|| constant(name))
            .map(Value::Num)
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
        call_math(name, &args).unwrap_or_else(|| {
            Err(ExprError::UnknownName {
                name: name.to_string(),
            })
        })
    }
}
