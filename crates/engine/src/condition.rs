//! Branch predicates for conditional logic nodes.
//!
//! Predicates are written in a small fixed grammar and evaluated against the
//! run variables, the node's output and the node's configuration. Nothing
//! outside those three JSON values is reachable.
//!
//! ```text
//! expr    := or
//! or      := and ( ("||" | "or") and )*
//! and     := not ( ("&&" | "and") not )*
//! not     := ("!" | "not") not | cmp
//! cmp     := primary ( ("==" | "!=" | "<" | "<=" | ">" | ">=") primary )?
//! primary := number | string | true | false | null | path | "(" expr ")"
//! path    := ident ( "." ident | "[" integer "]" )*
//! ```
//!
//! Path roots are `output`, `variables` (or `vars`) and `config`; any other
//! root is looked up as a variable. Missing paths evaluate to `null`.
//!
//! Nesting (`(` and `!`/`not`) is capped at [`MAX_NESTING`] levels and an
//! expression may hold at most [`MAX_OPERATORS`] binary operators, so the
//! tree stays shallow enough to parse, evaluate and drop recursively.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

pub const MAX_NESTING: usize = 64;
pub const MAX_OPERATORS: usize = 256;

/// What a predicate can see.
#[derive(Debug, Clone, Copy)]
pub struct ConditionScope<'a> {
    pub variables: &'a Map<String, Value>,
    pub output: &'a Value,
    pub config: &'a Map<String, Value>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: &'static str, found: String },

    #[error("cannot compare {left} {op} {right}")]
    Incomparable {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("condition must be a string or boolean, got {0}")]
    UnsupportedType(String),

    #[error("condition nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("condition has more than {0} operators")]
    TooComplex(usize),
}

/// Evaluate a configured predicate value.
///
/// Strings are parsed and evaluated; booleans are taken as-is.
pub fn evaluate_value(condition: &Value, scope: &ConditionScope<'_>) -> Result<bool, ConditionError> {
    match condition {
        Value::Bool(b) => Ok(*b),
        Value::String(expression) => evaluate(expression, scope),
        other => Err(ConditionError::UnsupportedType(type_name(other).to_owned())),
    }
}

/// Parse and evaluate `expression` in `scope`.
pub fn evaluate(expression: &str, scope: &ConditionScope<'_>) -> Result<bool, ConditionError> {
    parse(expression)?.evaluate(scope)
}

/// Parse `expression` into an AST without evaluating it.
pub fn parse(expression: &str) -> Result<Expr, ConditionError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0, operators: 0 };
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ConditionError::UnexpectedToken {
            expected: "end of expression",
            found: tok.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Literal(Value),
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::LBracket => write!(f, "'['"),
            Self::RBracket => write!(f, "']'"),
            Self::Dot => write!(f, "'.'"),
            Self::And => write!(f, "'&&'"),
            Self::Or => write!(f, "'||'"),
            Self::Not => write!(f, "'!'"),
            Self::Cmp(op) => write!(f, "'{}'", op.symbol()),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Ident(name) => write!(f, "'{name}'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);

        match c {
            c if c.is_whitespace() => i += 1,
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            '[' => { tokens.push(Token::LBracket); i += 1; }
            ']' => { tokens.push(Token::RBracket); i += 1; }
            '.' => { tokens.push(Token::Dot); i += 1; }
            '&' if next == Some('&') => { tokens.push(Token::And); i += 2; }
            '|' if next == Some('|') => { tokens.push(Token::Or); i += 2; }
            '=' if next == Some('=') => { tokens.push(Token::Cmp(CmpOp::Eq)); i += 2; }
            '!' if next == Some('=') => { tokens.push(Token::Cmp(CmpOp::Ne)); i += 2; }
            '!' => { tokens.push(Token::Not); i += 1; }
            '<' if next == Some('=') => { tokens.push(Token::Cmp(CmpOp::Le)); i += 2; }
            '<' => { tokens.push(Token::Cmp(CmpOp::Lt)); i += 1; }
            '>' if next == Some('=') => { tokens.push(Token::Cmp(CmpOp::Ge)); i += 2; }
            '>' => { tokens.push(Token::Cmp(CmpOp::Gt)); i += 1; }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(ConditionError::UnterminatedString(offset)),
                        Some(&(_, '\\')) => {
                            if let Some(&(_, escaped)) = chars.get(j + 1) {
                                text.push(escaped);
                            }
                            j += 2;
                        }
                        Some(&(_, ch)) if ch == quote => break,
                        Some(&(_, ch)) => {
                            text.push(ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::String(text)));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().map(|&(_, c)| c).collect();
                tokens.push(Token::Literal(parse_number(&text)?));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_alphanumeric() || chars[j].1 == '_') {
                    j += 1;
                }
                let word: String = chars[i..j].iter().map(|&(_, c)| c).collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    _ => Token::Ident(word),
                });
                i = j;
            }
            found => return Err(ConditionError::UnexpectedChar { found, offset }),
        }
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> Result<Value, ConditionError> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ConditionError::InvalidNumber(text.to_owned()))
}

// ---------------------------------------------------------------------------
// AST + parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<Segment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &'static str) -> Result<(), ConditionError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &'static str) -> ConditionError {
        ConditionError::UnexpectedToken {
            expected,
            found: self
                .peek()
                .map(ToString::to_string)
                .unwrap_or_else(|| "end of expression".to_owned()),
        }
    }

    /// Parse `inner` one nesting level down.
    fn nested<T>(
        &mut self,
        inner: impl FnOnce(&mut Self) -> Result<T, ConditionError>,
    ) -> Result<T, ConditionError> {
        if self.depth >= MAX_NESTING {
            return Err(ConditionError::TooDeep(MAX_NESTING));
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    fn count_operator(&mut self) -> Result<(), ConditionError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(ConditionError::TooComplex(MAX_OPERATORS));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.count_operator()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(self.parse_and()?));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::And) {
            self.count_operator()?;
            lhs = Expr::And(Box::new(lhs), Box::new(self.parse_not()?));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        if self.eat(&Token::Not) {
            let inner = self.nested(Self::parse_not)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            self.count_operator()?;
            let rhs = self.parse_primary()?;
            return Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.advance() {
            Some(Token::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Token::LParen) => {
                let inner = self.nested(Self::parse_or)?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(root)) => self.parse_path(root),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected("a value, path or '('"))
            }
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expr, ConditionError> {
        let mut segments = vec![Segment::Key(root)];
        loop {
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected("a field name after '.'"));
                    }
                }
            } else if self.eat(&Token::LBracket) {
                match self.advance() {
                    Some(Token::Literal(Value::Number(n))) if n.as_u64().is_some() => {
                        let index = n.as_u64().and_then(|i| usize::try_from(i).ok()).unwrap_or(usize::MAX);
                        segments.push(Segment::Index(index));
                    }
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected("a non-negative index"));
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
            } else {
                return Ok(Expr::Path(segments));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Expr {
    /// Evaluate to a boolean using JSON truthiness.
    pub fn evaluate(&self, scope: &ConditionScope<'_>) -> Result<bool, ConditionError> {
        Ok(truthy(&self.value(scope)?))
    }

    fn value(&self, scope: &ConditionScope<'_>) -> Result<Value, ConditionError> {
        Ok(match self {
            Expr::Literal(v) => v.clone(),
            Expr::Path(segments) => resolve(segments, scope).unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!inner.evaluate(scope)?),
            Expr::And(lhs, rhs) => Value::Bool(lhs.evaluate(scope)? && rhs.evaluate(scope)?),
            Expr::Or(lhs, rhs) => Value::Bool(lhs.evaluate(scope)? || rhs.evaluate(scope)?),
            Expr::Compare(op, lhs, rhs) => {
                Value::Bool(compare(*op, &lhs.value(scope)?, &rhs.value(scope)?)?)
            }
        })
    }
}

fn resolve(segments: &[Segment], scope: &ConditionScope<'_>) -> Option<Value> {
    let (Segment::Key(root), rest) = segments.split_first()? else {
        return None;
    };

    match root.as_str() {
        "output" => walk(scope.output, rest).cloned(),
        "variables" | "vars" => walk_map(scope.variables, rest),
        "config" => walk_map(scope.config, rest),
        name => walk(scope.variables.get(name)?, rest).cloned(),
    }
}

fn walk_map(map: &Map<String, Value>, segments: &[Segment]) -> Option<Value> {
    match segments.split_first() {
        None => Some(Value::Object(map.clone())),
        Some((Segment::Key(key), rest)) => walk(map.get(key)?, rest).cloned(),
        Some((Segment::Index(_), _)) => None,
    }
}

fn walk<'v>(mut current: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    for segment in segments {
        current = match segment {
            Segment::Key(key) => current.as_object()?.get(key)?,
            Segment::Index(i) => current.as_array()?.get(*i)?,
        };
    }
    Some(current)
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, ConditionError> {
    match op {
        CmpOp::Eq => Ok(loosely_equal(lhs, rhs)),
        CmpOp::Ne => Ok(!loosely_equal(lhs, rhs)),
        _ => {
            let ordering = match (lhs, rhs) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| ConditionError::Incomparable {
                op: op.symbol(),
                left: type_name(lhs).to_owned(),
                right: type_name(rhs).to_owned(),
            })?;

            Ok(match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

/// JSON equality, except that numbers compare by value (`1 == 1.0`).
fn loosely_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

/// `null`, `false`, `0`, `""`, `[]` and `{}` are false; everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
