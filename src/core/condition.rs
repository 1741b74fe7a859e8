//! Routing predicates
//!
//! Predicates are small boolean expressions evaluated against a JSON view
//! of the run state. They are parsed into an AST and interpreted; nothing
//! in a predicate can execute code.
//!
//! ```text
//! expr    := or
//! or      := and (("||" | "or") and)*
//! and     := unary (("&&" | "and") unary)*
//! unary   := ("!" | "not") unary | compare
//! compare := operand (op operand)?
//! op      := == | != | < | <= | > | >= | contains | startsWith | endsWith | matches
//! operand := literal | path | len "(" expr ")" | "(" expr ")"
//! path    := ident ("." ident | "[" (string | number) "]")*
//! ```

use crate::core::state::{RunState, StepOutput};
use regex::Regex;
use serde_json::{json, Value};
use std::cmp::Ordering;
use thiserror::Error;

const MAX_DEPTH: usize = 64;

/// Errors raised while parsing or evaluating a predicate
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    #[error("parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("evaluation error: {0}")]
    Eval(String),
}

/// A parsed routing predicate
#[derive(Debug, Clone)]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl Predicate {
    pub fn parse(source: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        if let Some((position, token)) = parser.tokens.get(parser.pos) {
            return Err(PredicateError::Parse {
                position: *position,
                message: format!("unexpected token {:?}", token),
            });
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a scope built by [`predicate_scope`]
    pub fn evaluate(&self, scope: &Value) -> Result<bool, PredicateError> {
        Ok(truthy(&eval(&self.expr, scope)?))
    }
}

/// Build the evaluation scope for a run, optionally with the output of the
/// step being routed exposed as `output`
pub fn predicate_scope(state: &RunState, current: Option<&StepOutput>) -> Value {
    let outputs: serde_json::Map<String, Value> = state
        .outputs
        .iter()
        .map(|(id, out)| (id.clone(), json!({ "text": out.text, "metadata": out.metadata })))
        .collect();

    json!({
        "status": state.status.as_str(),
        "progress": state.progress,
        "completedNodes": state.completed_nodes,
        "completed_nodes": state.completed_nodes,
        "totalNodes": state.total_nodes,
        "total_nodes": state.total_nodes,
        "currentAgent": state.current_agent,
        "current_agent": state.current_agent,
        "goal": state.goal,
        "outputs": outputs,
        "output": current.map(|o| json!({ "text": o.text, "metadata": o.metadata })),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Op(BinOp),
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
}

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(Vec<Segment>),
    Len(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, PredicateError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let parse_err = |position: usize, message: &str| PredicateError::Parse {
        position,
        message: message.to_string(),
    };

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '.' => {
                tokens.push((start, Token::Dot));
                i += 1;
            }
            '[' => {
                tokens.push((start, Token::LBracket));
                i += 1;
            }
            ']' => {
                tokens.push((start, Token::RBracket));
                i += 1;
            }
            '(' => {
                tokens.push((start, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((start, Token::RParen));
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push((start, Token::And));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push((start, Token::Or));
                i += 2;
            }
            '=' | '!' if chars.get(i + 1) == Some(&'=') => {
                let op = if c == '=' { BinOp::Eq } else { BinOp::Ne };
                i += 2;
                // Accept `===` and `!==`
                if chars.get(i) == Some(&'=') {
                    i += 1;
                }
                tokens.push((start, Token::Op(op)));
            }
            '!' => {
                tokens.push((start, Token::Not));
                i += 1;
            }
            '<' | '>' => {
                let or_equal = chars.get(i + 1) == Some(&'=');
                let op = match (c, or_equal) {
                    ('<', false) => BinOp::Lt,
                    ('<', true) => BinOp::Le,
                    ('>', false) => BinOp::Gt,
                    _ => BinOp::Ge,
                };
                tokens.push((start, Token::Op(op)));
                i += if or_equal { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(parse_err(start, "unterminated string")),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| parse_err(i, "dangling escape"))?;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Token::Str(value)));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| parse_err(start, "invalid number"))?;
                tokens.push((start, Token::Number(number)));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "contains" => Token::Op(BinOp::Contains),
                    "startsWith" | "starts_with" => Token::Op(BinOp::StartsWith),
                    "endsWith" | "ends_with" => Token::Op(BinOp::EndsWith),
                    "matches" => Token::Op(BinOp::Matches),
                    _ => Token::Ident(word),
                };
                tokens.push((start, token));
            }
            _ => return Err(parse_err(start, &format!("unexpected character '{}'", c))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0)
    }

    fn error(&self, message: impl Into<String>) -> PredicateError {
        PredicateError::Parse {
            position: self.position(),
            message: message.into(),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), PredicateError> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(self.error(format!("expected {:?}, found {:?}", expected, t))),
            None => Err(self.error(format!("expected {:?}, found end of input", expected))),
        }
    }

    fn expr(&mut self) -> Result<Expr, PredicateError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        let expr = self.or();
        self.depth -= 1;
        expr
    }

    fn or(&mut self) -> Result<Expr, PredicateError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, PredicateError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, PredicateError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.depth += 1;
            if self.depth > MAX_DEPTH {
                return Err(self.error("expression nested too deeply"));
            }
            let inner = self.unary();
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, PredicateError> {
        let left = self.operand()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.operand()?;
            return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn operand(&mut self) -> Result<Expr, PredicateError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(json!(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                "len" if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let inner = self.expr()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::Len(Box::new(inner)))
                }
                _ => self.path(word),
            },
            Some(t) => Err(self.error(format!("unexpected token {:?}", t))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn path(&mut self, root: String) -> Result<Expr, PredicateError> {
        let mut segments = vec![Segment::Key(root)];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                        _ => return Err(self.error("expected identifier after '.'")),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let segment = match self.next() {
                        Some(Token::Str(key)) => Segment::Key(key),
                        Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                            Segment::Index(n as usize)
                        }
                        _ => return Err(self.error("expected string or index inside '[]'")),
                    };
                    self.expect(Token::RBracket)?;
                    segments.push(segment);
                }
                _ => break,
            }
        }

        // `state.` is an optional prefix
        if segments.len() > 1 && matches!(&segments[0], Segment::Key(k) if k == "state") {
            segments.remove(0);
        }

        Ok(Expr::Path(segments))
    }
}

fn eval(expr: &Expr, scope: &Value) -> Result<Value, PredicateError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(segments) => Ok(resolve(scope, segments)),
        Expr::Len(inner) => {
            let value = eval(inner, scope)?;
            let len = match &value {
                Value::Null => 0,
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => {
                    return Err(PredicateError::Eval(format!("len() of {}", type_name(other))))
                }
            };
            Ok(json!(len))
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::And(l, r) => {
            if !truthy(&eval(l, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(r, scope)?)))
        }
        Expr::Or(l, r) => {
            if truthy(&eval(l, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(r, scope)?)))
        }
        Expr::Binary(op, l, r) => {
            let left = eval(l, scope)?;
            let right = eval(r, scope)?;
            binary(*op, &left, &right).map(Value::Bool)
        }
    }
}

fn resolve(scope: &Value, segments: &[Segment]) -> Value {
    let mut current = scope;
    for segment in segments {
        let next = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(i), Value::Array(items)) => items.get(*i),
            (Segment::Key(key), Value::Array(items)) if key == "length" => {
                return json!(items.len());
            }
            (Segment::Key(key), Value::String(s)) if key == "length" => {
                return json!(s.chars().count());
            }
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<bool, PredicateError> {
    match op {
        BinOp::Eq => Ok(loose_eq(left, right)),
        BinOp::Ne => Ok(!loose_eq(left, right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(left, right)?;
            Ok(match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        BinOp::Contains => match (left, right) {
            (Value::Null, _) => Ok(false),
            (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
            (Value::Array(items), needle) => Ok(items.iter().any(|item| loose_eq(item, needle))),
            (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
            (l, r) => Err(PredicateError::Eval(format!(
                "cannot apply contains to {} and {}",
                type_name(l),
                type_name(r)
            ))),
        },
        BinOp::StartsWith | BinOp::EndsWith => match (left, right) {
            (Value::Null, _) => Ok(false),
            (Value::String(s), Value::String(affix)) => Ok(if op == BinOp::StartsWith {
                s.starts_with(affix.as_str())
            } else {
                s.ends_with(affix.as_str())
            }),
            (l, r) => Err(PredicateError::Eval(format!(
                "cannot compare affix of {} and {}",
                type_name(l),
                type_name(r)
            ))),
        },
        BinOp::Matches => match (left, right) {
            (Value::Null, _) => Ok(false),
            (Value::String(s), Value::String(pattern)) => {
                let regex = Regex::new(pattern)
                    .map_err(|e| PredicateError::Eval(format!("invalid regex: {}", e)))?;
                Ok(regex.is_match(s))
            }
            (l, r) => Err(PredicateError::Eval(format!(
                "cannot match {} against {}",
                type_name(l),
                type_name(r)
            ))),
        },
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, PredicateError> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let (l, r) = (left.as_f64().unwrap_or(f64::NAN), right.as_f64().unwrap_or(f64::NAN));
            l.partial_cmp(&r)
                .ok_or_else(|| PredicateError::Eval("cannot order NaN".to_string()))
        }
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        (l, r) => Err(PredicateError::Eval(format!(
            "cannot order {} and {}",
            type_name(l),
            type_name(r)
        ))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
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
