//! Expression engine shared by the calculator and the code sandbox.
//!
//! A hand-written lexer and recursive-descent parser over a small
//! arithmetic/logic grammar. Evaluation goes through the [`Env`] trait, so
//! each caller decides which names and functions exist. Nothing here can
//! reach the filesystem, the network, or the host process.

use std::collections::BTreeSet;

use thiserror::Error;

/// Maximum nesting of parentheses / unary operators.
const MAX_DEPTH: usize = 64;

/// Maximum length of any string value, in characters.
pub const MAX_STRING_LEN: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("{message} (at position {pos})")]
    Syntax { pos: usize, message: String },

    #[error("{name} is not defined")]
    UnknownName { name: String },

    #[error("{message}")]
    Type { message: String },

    #[error("{message}")]
    Math { message: String },

    #[error("{message}")]
    Limit { message: String },
}

impl ExprError {
    fn syntax(pos: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            message: message.into(),
        }
    }

    fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    fn math(message: impl Into<String>) -> Self {
        Self::Math {
            message: message.into(),
        }
    }
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(f64),
    Str(String),
    Ident(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    StarStar,

    LParen,
    RParen,
    Comma,
    Dot,

    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,

    Semi,
    Newline,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

/// Tokenize source text. `#` and `//` start line comments.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];
        let start = pos;
        let next = chars.get(pos + 1).copied();

        if ch == '#' || (ch == '/' && next == Some('/')) {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        if ch == '\n' {
            tokens.push(Spanned {
                token: Token::Newline,
                pos,
            });
            pos += 1;
            continue;
        }

        if ch.is_whitespace() {
            pos += 1;
            continue;
        }

        if ch.is_ascii_digit() || (ch == '.' && next.is_some_and(|c| c.is_ascii_digit())) {
            let (value, end) = lex_number(&chars, pos)?;
            tokens.push(Spanned {
                token: Token::Num(value),
                pos: start,
            });
            pos = end;
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(chars[start..pos].iter().collect()),
                pos: start,
            });
            continue;
        }

        if ch == '"' || ch == '\'' {
            let (value, end) = lex_string(&chars, pos)?;
            tokens.push(Spanned {
                token: Token::Str(value),
                pos: start,
            });
            pos = end;
            continue;
        }

        let followed_by = |c: char| next == Some(c);
        let (token, width) = match ch {
            '+' => (Token::Plus, 1),
            '-' | '−' => (Token::Minus, 1),
            '*' if followed_by('*') => (Token::StarStar, 2),
            '*' | '×' => (Token::Star, 1),
            '/' | '÷' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '^' => (Token::Caret, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            '.' => (Token::Dot, 1),
            ';' => (Token::Semi, 1),
            '=' if followed_by('=') => {
                let width = if chars.get(pos + 2) == Some(&'=') { 3 } else { 2 };
                (Token::EqEq, width)
            }
            '=' => (Token::Assign, 1),
            '!' if followed_by('=') => {
                let width = if chars.get(pos + 2) == Some(&'=') { 3 } else { 2 };
                (Token::NotEq, width)
            }
            '!' => (Token::Bang, 1),
            '<' if followed_by('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if followed_by('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '&' if followed_by('&') => (Token::AndAnd, 2),
            '|' if followed_by('|') => (Token::OrOr, 2),
            other => {
                return Err(ExprError::syntax(
                    pos,
                    format!("unexpected character '{other}'"),
                ))
            }
        };
        tokens.push(Spanned { token, pos });
        pos += width;
    }

    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize), ExprError> {
    let mut pos = start;
    while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '_') {
        pos += 1;
    }
    if pos < chars.len() && chars[pos] == '.' {
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    // Exponent only when digits follow, so `2e` stays `2 * e`.
    if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
        let mut look = pos + 1;
        if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
            look += 1;
        }
        if look < chars.len() && chars[look].is_ascii_digit() {
            pos = look;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }

    let text: String = chars[start..pos].iter().filter(|c| **c != '_').collect();
    text.parse::<f64>()
        .map(|v| (v, pos))
        .map_err(|_| ExprError::syntax(start, format!("invalid number '{text}'")))
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), ExprError> {
    let quote = chars[start];
    let mut pos = start + 1;
    let mut value = String::new();
    let mut len = 0;

    while pos < chars.len() {
        let ch = chars[pos];
        if ch == quote {
            return Ok((value, pos + 1));
        }
        if ch == '\n' {
            break;
        }
        if ch == '\\' {
            pos += 1;
            match chars.get(pos) {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some(&other) => value.push(other),
                None => break,
            }
        } else {
            value.push(ch);
        }
        len += 1;
        if len > MAX_STRING_LEN {
            return Err(ExprError::Limit {
                message: format!("string literal longer than {MAX_STRING_LEN} characters"),
            });
        }
        pos += 1;
    }

    Err(ExprError::syntax(start, "unterminated string literal"))
}

// ─── AST ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { name: String, value: Expr },
    Import { module: String },
    Expr(Expr),
}

// ─── Parser ──────────────────────────────────────────────────────────────────

/// Parse a single expression. With `implicit_mul`, juxtaposition
/// multiplies: `2x`, `2(3)`, `(1+2)(3+4)`.
pub fn parse_expression(source: &str, implicit_mul: bool) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?
        .into_iter()
        .filter(|t| t.token != Token::Newline)
        .collect();
    let mut parser = Parser::new(tokens, implicit_mul);
    if parser.at_end() {
        return Err(ExprError::syntax(0, "empty expression"));
    }
    let expr = parser.parse_expr()?;
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

/// Parse a statement list separated by newlines or `;`.
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ExprError> {
    let mut parser = Parser::new(tokenize(source)?, false);
    let mut statements = Vec::new();

    loop {
        while matches!(parser.peek(), Some(Token::Newline | Token::Semi)) {
            parser.advance();
        }
        if parser.at_end() {
            break;
        }
        statements.push(parser.parse_statement()?);
        match parser.peek() {
            None | Some(Token::Newline | Token::Semi) => {}
            Some(_) => return Err(parser.error("expected end of statement")),
        }
    }

    Ok(statements)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    implicit_mul: bool,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, implicit_mul: bool) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            implicit_mul,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: &str) -> ExprError {
        let pos = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.pos)
            .unwrap_or(0);
        ExprError::syntax(pos, message)
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ExprError> {
        if self.peek() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn peek_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == word)
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::Limit {
                message: format!("expression nested deeper than {MAX_DEPTH} levels"),
            });
        }
        Ok(())
    }

    // ── Statements ──────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Stmt, ExprError> {
        if let Some(Token::Ident(word)) = self.peek().cloned() {
            match word.as_str() {
                "let" | "const" | "var" => {
                    self.advance();
                    let name = self.parse_binding_name()?;
                    self.expect(&Token::Assign, "'='")?;
                    let value = self.parse_expr()?;
                    return Ok(Stmt::Assign { name, value });
                }
                "import" => {
                    self.advance();
                    let module = self.parse_binding_name()?;
                    return Ok(Stmt::Import { module });
                }
                _ => {}
            }
            if self.peek_at(1) == Some(&Token::Assign) {
                let name = self.parse_binding_name()?;
                self.advance();
                let value = self.parse_expr()?;
                return Ok(Stmt::Assign { name, value });
            }
        }
        Ok(Stmt::Expr(self.parse_expr()?))
    }

    fn parse_binding_name(&mut self) -> Result<String, ExprError> {
        match self.advance() {
            Some(Token::Ident(name)) if !is_reserved(&name) => Ok(name),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected a name"))
            }
        }
    }

    // ── Expressions ─────────────────────────────────────────────────
    //
    // Precedence (lowest to highest):
    //   or (|| or) → and (&& and) → not (! not) → comparison
    //   → additive → multiplicative (incl. implicit) → unary minus
    //   → power (** ^, right-assoc) → primary

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let result = self.parse_or();
        self.depth -= 1;
        result
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) || self.peek_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::AndAnd) || self.peek_keyword("and") {
            self.advance();
            let right = self.parse_not()?;
            left = binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Bang) || self.peek_keyword("not") {
            self.advance();
            self.enter()?;
            let inner = self.parse_not();
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let juxtaposed = self.implicit_mul
                && match self.peek() {
                    Some(Token::Num(_) | Token::LParen) => true,
                    Some(Token::Ident(name)) => !is_operator_word(name),
                    _ => false,
                };
            if juxtaposed {
                let right = self.parse_power()?;
                left = binary(BinOp::Mul, left, right);
                continue;
            }

            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                self.enter()?;
                let inner = self.parse_unary();
                self.depth -= 1;
                Ok(Expr::Neg(Box::new(inner?)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.enter()?;
                let inner = self.parse_unary();
                self.depth -= 1;
                inner
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ExprError> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Some(Token::StarStar | Token::Caret)) {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Some(Token::Num(v)) => Ok(Expr::Num(v)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Bool(true)),
                "false" | "False" => Ok(Expr::Bool(false)),
                "null" | "None" | "undefined" => Ok(Expr::Null),
                _ => self.parse_name(name),
            },
            Some(_) => {
                self.pos -= 1;
                Err(self.error("unexpected token"))
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// Dotted name (`Math.sqrt`, `console.log`), optionally called.
    fn parse_name(&mut self, first: String) -> Result<Expr, ExprError> {
        let mut name = first;
        while self.peek() == Some(&Token::Dot) {
            match self.peek_at(1) {
                Some(Token::Ident(part)) => {
                    name.push('.');
                    name.push_str(part);
                    self.pos += 2;
                }
                _ => return Err(self.error("expected a name after '.'")),
            }
        }

        if self.peek() != Some(&Token::LParen) {
            return Ok(Expr::Var(name));
        }
        self.advance();

        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(Expr::Call { name, args });
        }
        loop {
            args.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.error("expected ',' or ')' in argument list"));
                }
            }
        }
        Ok(Expr::Call { name, args })
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_operator_word(word: &str) -> bool {
    matches!(word, "and" | "or" | "not")
}

fn is_reserved(word: &str) -> bool {
    is_operator_word(word)
        || matches!(
            word,
            "let" | "const" | "var" | "import" | "true" | "True" | "false" | "False" | "null"
                | "None" | "undefined"
        )
}

/// Variable names referenced by an expression, excluding constants.
pub fn free_variables(expr: &Expr) -> BTreeSet<String> {
    fn walk(expr: &Expr, out: &mut BTreeSet<String>) {
        match expr {
            Expr::Var(name) if constant(name).is_none() => {
                out.insert(name.clone());
            }
            Expr::Neg(inner) | Expr::Not(inner) => walk(inner, out),
            Expr::Binary { left, right, .. } => {
                walk(left, out);
                walk(right, out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| walk(a, out)),
            _ => {}
        }
    }
    let mut out = BTreeSet::new();
    walk(expr, &mut out);
    out
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// Display and operator conventions of the source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    JavaScript,
    Python,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Value {
    pub fn type_name(&self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (Value::Num(_), Dialect::JavaScript) => "number",
            (Value::Num(_), Dialect::Python) => "float",
            (Value::Str(_), Dialect::JavaScript) => "string",
            (Value::Str(_), Dialect::Python) => "str",
            (Value::Bool(_), Dialect::JavaScript) => "boolean",
            (Value::Bool(_), Dialect::Python) => "bool",
            (Value::Null, Dialect::JavaScript) => "null",
            (Value::Null, Dialect::Python) => "NoneType",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Null => false,
        }
    }

    pub fn as_number(&self) -> Result<f64, ExprError> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(ExprError::type_error(format!(
                "expected a number, got {}",
                other.type_name(Dialect::JavaScript)
            ))),
        }
    }

    pub fn display(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (Value::Num(n), _) => format_number(*n),
            (Value::Str(s), _) => s.clone(),
            (Value::Bool(b), Dialect::JavaScript) => b.to_string(),
            (Value::Bool(true), Dialect::Python) => "True".into(),
            (Value::Bool(false), Dialect::Python) => "False".into(),
            (Value::Null, Dialect::JavaScript) => "null".into(),
            (Value::Null, Dialect::Python) => "None".into(),
        }
    }
}

/// Round away float noise such as `0.1 + 0.2`.
pub fn clean_number(x: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    if x.abs() < 1e5 {
        let scale = 1e10;
        let rounded = (x * scale).round() / scale;
        if rounded == 0.0 {
            return 0.0;
        }
        return rounded;
    }
    x
}

pub fn format_number(x: f64) -> String {
    let x = clean_number(x);
    if x.is_nan() {
        return "NaN".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if x.fract() == 0.0 && x.abs() < 1e15 {
        return format!("{}", x as i64);
    }
    format!("{x}")
}

/// JSON number, integral when the value is integral.
pub fn number_to_json(x: f64) -> serde_json::Value {
    let x = clean_number(x);
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        return serde_json::Value::from(x as i64);
    }
    serde_json::Number::from_f64(x)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

/// Name resolution and function calls for [`eval`].
pub trait Env {
    fn dialect(&self) -> Dialect;
    fn lookup(&self, name: &str) -> Option<Value>;
    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExprError>;
}

pub fn eval(expr: &Expr, env: &mut dyn Env) -> Result<Value, ExprError> {
    match expr {
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Var(name) => env
            .lookup(name)
            .ok_or_else(|| ExprError::UnknownName { name: name.clone() }),
        Expr::Neg(inner) => Ok(Value::Num(-eval(inner, env)?.as_number()?)),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, env)?.truthy())),
        Expr::Binary { op, left, right } => {
            let lhs = eval(left, env)?;
            match op {
                BinOp::And if !lhs.truthy() => return Ok(lhs),
                BinOp::And => return eval(right, env),
                BinOp::Or if lhs.truthy() => return Ok(lhs),
                BinOp::Or => return eval(right, env),
                _ => {}
            }
            let rhs = eval(right, env)?;
            apply_binary(*op, lhs, rhs, env.dialect())
        }
        Expr::Call { name, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, env))
                .collect::<Result<Vec<_>, _>>()?;
            env.call(name, values)
        }
    }
}

fn finite(x: f64) -> Result<Value, ExprError> {
    if x.is_finite() {
        Ok(Value::Num(x))
    } else {
        Err(ExprError::math("result is not a finite number"))
    }
}

fn bounded_string(s: String) -> Result<Value, ExprError> {
    if s.chars().count() > MAX_STRING_LEN {
        return Err(ExprError::Limit {
            message: format!("string longer than {MAX_STRING_LEN} characters"),
        });
    }
    Ok(Value::Str(s))
}

fn apply_binary(op: BinOp, lhs: Value, rhs: Value, dialect: Dialect) -> Result<Value, ExprError> {
    let unsupported = |lhs: &Value, rhs: &Value, symbol: &str| {
        ExprError::type_error(format!(
            "unsupported operand types for {symbol}: '{}' and '{}'",
            lhs.type_name(dialect),
            rhs.type_name(dialect)
        ))
    };

    match op {
        BinOp::Add => match (&lhs, &rhs) {
            (Value::Str(a), Value::Str(b)) => bounded_string(format!("{a}{b}")),
            (Value::Str(_), _) | (_, Value::Str(_)) => match dialect {
                Dialect::JavaScript => {
                    bounded_string(format!("{}{}", lhs.display(dialect), rhs.display(dialect)))
                }
                Dialect::Python => Err(unsupported(&lhs, &rhs, "+")),
            },
            _ => finite(lhs.as_number()? + rhs.as_number()?),
        },
        BinOp::Mul => match (&lhs, &rhs, dialect) {
            (Value::Str(s), Value::Num(n), Dialect::Python)
            | (Value::Num(n), Value::Str(s), Dialect::Python) => {
                if n.fract() != 0.0 {
                    return Err(unsupported(&lhs, &rhs, "*"));
                }
                let count = n.max(0.0) as usize;
                if s.chars().count().saturating_mul(count) > MAX_STRING_LEN {
                    return Err(ExprError::Limit {
                        message: format!("string longer than {MAX_STRING_LEN} characters"),
                    });
                }
                Ok(Value::Str(s.repeat(count)))
            }
            (Value::Str(_), _, _) | (_, Value::Str(_), _) => Err(unsupported(&lhs, &rhs, "*")),
            _ => finite(lhs.as_number()? * rhs.as_number()?),
        },
        BinOp::Sub | BinOp::Div | BinOp::Rem | BinOp::Pow => {
            if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
                return Err(unsupported(&lhs, &rhs, op_symbol(op)));
            }
            let (a, b) = (lhs.as_number()?, rhs.as_number()?);
            match op {
                BinOp::Sub => finite(a - b),
                BinOp::Div if b == 0.0 => Err(ExprError::math("division by zero")),
                BinOp::Div => finite(a / b),
                BinOp::Rem if b == 0.0 => Err(ExprError::math("modulo by zero")),
                BinOp::Rem => match dialect {
                    Dialect::JavaScript => finite(a % b),
                    Dialect::Python => finite(a - b * (a / b).floor()),
                },
                _ => finite(a.powf(b)),
            }
        }
        BinOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                (Value::Str(_), _) | (_, Value::Str(_)) | (Value::Null, _) | (_, Value::Null) => {
                    return Err(unsupported(&lhs, &rhs, op_symbol(op)))
                }
                _ => lhs.as_number()?.partial_cmp(&rhs.as_number()?),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::And | BinOp::Or => Ok(rhs),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => x == y,
        _ => a == b,
    }
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Pow => "**",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "and",
        BinOp::Or => "or",
    }
}

// ─── Math builtins ───────────────────────────────────────────────────────────

/// Named constants: `pi`, `e`, and their `Math.`/`math.` forms.
pub fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" | "PI" | "π" | "Math.PI" | "math.pi" => Some(std::f64::consts::PI),
        "e" | "E" | "Math.E" | "math.e" => Some(std::f64::consts::E),
        _ => None,
    }
}

/// Call a math builtin. Returns `None` when `name` is not one.
///
/// Bare `log(x)` is base 10; the namespaced `Math.log` / `math.log` are
/// natural logarithms as in their languages. `log(x, b)` takes a base.
pub fn call_math(name: &str, args: &[Value]) -> Option<Result<Value, ExprError>> {
    let (namespaced, base) = match name
        .strip_prefix("Math.")
        .or_else(|| name.strip_prefix("math."))
    {
        Some(rest) => (true, rest),
        None => (false, name),
    };

    let unary = |f: fn(f64) -> f64| -> Result<Value, ExprError> {
        check_arity(name, args, 1, 1)?;
        finite(f(args[0].as_number()?))
    };

    let result = match base {
        "sqrt" => (|| {
            check_arity(name, args, 1, 1)?;
            let x = args[0].as_number()?;
            if x < 0.0 {
                return Err(ExprError::math("square root of a negative number"));
            }
            finite(x.sqrt())
        })(),
        "abs" => unary(f64::abs),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "asin" => unary(f64::asin),
        "acos" => unary(f64::acos),
        "atan" => unary(f64::atan),
        "exp" => unary(f64::exp),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(f64::round),
        "trunc" => unary(f64::trunc),
        "ln" => logarithm(name, args, Some(std::f64::consts::E)),
        "log" if namespaced && args.len() == 1 => logarithm(name, args, Some(std::f64::consts::E)),
        "log" => logarithm(name, args, None),
        "log10" => logarithm(name, args, Some(10.0)),
        "log2" => logarithm(name, args, Some(2.0)),
        "pow" => (|| {
            check_arity(name, args, 2, 2)?;
            finite(args[0].as_number()?.powf(args[1].as_number()?))
        })(),
        "min" | "max" => (|| {
            check_arity(name, args, 1, usize::MAX)?;
            let mut values = args.iter().map(Value::as_number);
            let first = values.next().unwrap_or(Ok(0.0))?;
            values.try_fold(first, |acc, v| {
                let v = v?;
                Ok(if base == "min" { acc.min(v) } else { acc.max(v) })
            })
            .map(Value::Num)
        })(),
        _ => return None,
    };
    Some(result)
}

/// `default_base` of `None` means "base 10 unless a second argument is given".
fn logarithm(name: &str, args: &[Value], default_base: Option<f64>) -> Result<Value, ExprError> {
    let max_args = if default_base.is_none() { 2 } else { 1 };
    check_arity(name, args, 1, max_args)?;
    let x = args[0].as_number()?;
    if x <= 0.0 {
        return Err(ExprError::math("logarithm of a non-positive number"));
    }
    let base = match args.get(1) {
        Some(b) => b.as_number()?,
        None => default_base.unwrap_or(10.0),
    };
    if base <= 0.0 || base == 1.0 {
        return Err(ExprError::math("invalid logarithm base"));
    }
    finite(x.ln() / base.ln())
}

fn check_arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExprError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(ExprError::type_error(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestEnv {
        vars: HashMap<String, Value>,
        dialect: Dialect,
    }

    impl Env for TestEnv {
        fn dialect(&self) -> Dialect {
            self.dialect
        }
        fn lookup(&self, name: &str) -> Option<Value> {
            self.vars
                .get(name)
                .cloned()
                .or_else(|| constant(name).map(Value::Num))
        }
        fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
            call_math(name, &args).unwrap_or_else(|| {
                Err(ExprError::UnknownName {
                    name: name.to_string(),
                })
            })
        }
    }

    fn run(src: &str, implicit: bool) -> Result<Value, ExprError> {
        let expr = parse_expression(src, implicit)?;
        let mut env = TestEnv {
            vars: HashMap::from([("x".to_string(), Value::Num(3.0))]),
            dialect: Dialect::JavaScript,
        };
        eval(&expr, &mut env)
    }

    fn num(src: &str) -> f64 {
        match run(src, true).unwrap() {
            Value::Num(n) => clean_number(n),
            other => panic!("not a number: {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(num("2 + 3 * 4"), 14.0);
        assert_eq!(num("(2 + 3) * 4"), 20.0);
        assert_eq!(num("-2 ^ 2"), -4.0);
        assert_eq!(num("2 ** 3 ** 2"), 512.0);
        assert_eq!(num("2 ^ -1"), 0.5);
        assert_eq!(num("10 % 4"), 2.0);
    }

    #[test]
    fn test_implicit_multiplication() {
        assert_eq!(num("2x"), 6.0);
        assert_eq!(num("2(3)"), 6.0);
        assert_eq!(num("(1 + 2)(3 + 1)"), 12.0);
        assert_eq!(num("2pi"), clean_number(2.0 * std::f64::consts::PI));
        assert_eq!(num("2x^2"), 18.0);
    }

    #[test]
    fn test_implicit_multiplication_disabled() {
        assert!(matches!(run("2x", false), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn test_functions_and_constants() {
        assert_eq!(num("sqrt(16)"), 4.0);
        assert_eq!(num("log(1000)"), 3.0);
        assert_eq!(num("Math.log(e)"), 1.0);
        assert_eq!(num("log(8, 2)"), 3.0);
        assert_eq!(num("max(1, 7, 3)"), 7.0);
        assert_eq!(num("sin(pi)"), 0.0);
    }

    #[test]
    fn test_scientific_notation_and_unicode_ops() {
        assert_eq!(num("1.5e3"), 1500.0);
        assert_eq!(num("6 × 7"), 42.0);
        assert_eq!(num("8 ÷ 2"), 4.0);
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(run("1 / 0", true), Err(ExprError::Math { .. })));
    }

    #[test]
    fn test_unknown_function_is_error() {
        let err = run("__import__(1)", true).unwrap_err();
        assert_eq!(
            err,
            ExprError::UnknownName {
                name: "__import__".into()
            }
        );
    }

    #[test]
    fn test_arity_checked() {
        assert!(matches!(run("sqrt(1, 2)", true), Err(ExprError::Type { .. })));
    }

    #[test]
    fn test_depth_limit() {
        let src = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(matches!(run(&src, true), Err(ExprError::Limit { .. })));
    }

    #[test]
    fn test_string_concat_dialects() {
        let expr = parse_expression("'a' + 1", false).unwrap();
        let mut js = TestEnv {
            vars: HashMap::new(),
            dialect: Dialect::JavaScript,
        };
        assert_eq!(eval(&expr, &mut js).unwrap(), Value::Str("a1".into()));
        let mut py = TestEnv {
            vars: HashMap::new(),
            dialect: Dialect::Python,
        };
        assert!(matches!(eval(&expr, &mut py), Err(ExprError::Type { .. })));
    }

    #[test]
    fn test_logic_short_circuits() {
        assert_eq!(run("0 || 5", false).unwrap(), Value::Num(5.0));
        assert_eq!(run("false and missing", false).unwrap(), Value::Bool(false));
        assert_eq!(run("not (1 > 2)", false).unwrap(), Value::Bool(true));
        assert_eq!(run("1 === 1", false).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_parse_program_statements() {
        let program = parse_program("let a = 1; b = a + 2\nprint(b)").unwrap();
        assert_eq!(program.len(), 3);
        assert!(matches!(&program[0], Stmt::Assign { name, .. } if name == "a"));
        assert!(matches!(&program[1], Stmt::Assign { name, .. } if name == "b"));
        assert!(matches!(&program[2], Stmt::Expr(Expr::Call { name, .. }) if name == "print"));
    }

    #[test]
    fn test_parse_program_comments_and_dotted_calls() {
        let program = parse_program("# setup\nconsole.log(Math.sqrt(9)) // done").unwrap();
        assert_eq!(program.len(), 1);
        assert!(matches!(&program[0], Stmt::Expr(Expr::Call { name, .. }) if name == "console.log"));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(tokenize("'abc"), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn test_free_variables_skip_constants() {
        let expr = parse_expression("2x + pi * y", true).unwrap();
        let vars: Vec<String> = free_variables(&expr).into_iter().collect();
        assert_eq!(vars, vec!["x", "y"]);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(number_to_json(4.0), serde_json::json!(4));
    }
}
