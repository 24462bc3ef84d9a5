//! Expressions used inside commands: data paths, loop references, literals,
//! and the handful of JavaScript operators templates rely on.

use serde_json::{Number, Value};
use std::fmt;

/// Loop binding visible to expressions as `$var`.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) var: String,
    pub(crate) value: Value,
    pub(crate) index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Path),
    Not(Box<Expr>),
    Compare {
        negated: bool,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    root: Root,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Root {
    Data(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Root::Data(name) => write!(f, "{name}")?,
            Root::Var(name) => write!(f, "${name}")?,
        }
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

impl Path {
    pub(crate) fn is_data(&self) -> bool {
        matches!(self.root, Root::Data(_))
    }

    pub(crate) fn resolves_in(&self, data: &Value) -> bool {
        self.resolve(data, &[]).is_some()
    }

    fn resolve(&self, data: &Value, frames: &[Frame]) -> Option<Value> {
        let mut current = match &self.root {
            Root::Data(name) => data.get(name)?.clone(),
            Root::Var(name) if name == "idx" => frames.last().map(|f| Value::from(f.index))?,
            Root::Var(name) => frames.iter().rev().find(|f| &f.var == name)?.value.clone(),
        };
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Index(i), Value::Array(mut items)) if *i < items.len() => items.swap_remove(*i),
                (Segment::Key(key), Value::Object(mut map)) => map.remove(key)?,
                (Segment::Key(key), Value::Array(items)) if key == "length" => Value::from(items.len()),
                (Segment::Key(key), Value::String(s)) if key == "length" => Value::from(s.chars().count()),
                _ => return None,
            };
        }
        Some(current)
    }
}

impl Expr {
    pub(crate) fn evaluate(&self, data: &Value, frames: &[Frame]) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Path(path) => path.resolve(data, frames).unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.evaluate(data, frames))),
            Expr::Compare {
                negated,
                left,
                right,
            } => {
                let equal = loose_eq(&left.evaluate(data, frames), &right.evaluate(data, frames));
                Value::Bool(equal != *negated)
            }
            Expr::And(left, right) => {
                let l = left.evaluate(data, frames);
                if truthy(&l) {
                    right.evaluate(data, frames)
                } else {
                    l
                }
            }
            Expr::Or(left, right) => {
                let l = left.evaluate(data, frames);
                if truthy(&l) {
                    l
                } else {
                    right.evaluate(data, frames)
                }
            }
        }
    }

    /// Data paths (loop references excluded) this expression reads.
    pub(crate) fn data_paths(&self) -> Vec<&Path> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Path(path) if path.is_data() => out.push(path),
            Expr::Path(_) => {}
            Expr::Not(inner) => inner.collect_paths(out),
            Expr::Compare { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
        }
    }
}

/// JavaScript truthiness.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Text inserted into the document for a value.
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Bang,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn closing_quote(open: char) -> Option<char> {
    match open {
        '"' => Some('"'),
        '\'' => Some('\''),
        '\u{201C}' => Some('\u{201D}'),
        '\u{2018}' => Some('\u{2019}'),
        _ => None,
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if let Some(close) = closing_quote(c) {
            let start = i + 1;
            let end = (start..chars.len())
                .find(|&j| chars[j] == close)
                .ok_or_else(|| "unterminated string literal".to_string())?;
            tokens.push(Token::Str(chars[start..end].iter().collect()));
            i = end + 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let number = literal
                .parse::<f64>()
                .map_err(|_| format!("invalid number `{literal}`"))?;
            tokens.push(Token::Number(number));
            continue;
        }
        if is_ident_char(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let third = chars.get(i + 2).copied();
        let (token, width) = match (c, next) {
            ('.', _) => (Token::Dot, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('=', Some('=')) if third == Some('=') => (Token::EqEq, 3),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) if third == Some('=') => (Token::NotEq, 3),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('!', _) => (Token::Bang, 1),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            _ => return Err(format!("unexpected character `{c}`")),
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

/// Parses an expression such as `patient.name || 'N/A'` or `$m.heure != null`.
pub fn parse_expr(src: &str) -> Result<Expr, String> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected {token:?} after expression")),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.comparison()?;
        while self.eat(&Token::AndAnd) {
            let right = self.comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let left = self.unary()?;
        let negated = match self.peek() {
            Some(Token::EqEq) => false,
            Some(Token::NotEq) => true,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.unary()?;
        Ok(Expr::Compare {
            negated,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing `)`".to_string());
                }
                Ok(inner)
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                _ => self.path(ident).map(Expr::Path),
            },
            Some(token) => Err(format!("unexpected {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn path(&mut self, head: String) -> Result<Path, String> {
        let root = match head.strip_prefix('$') {
            Some("") => return Err("`$` must be followed by a name".to_string()),
            Some(var) => Root::Var(var.to_string()),
            None => Root::Data(head),
        };
        let mut segments = Vec::new();
        loop {
            if self.eat(&Token::Dot) {
                match self.next() {
                    Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                    _ => return Err("expected a name after `.`".to_string()),
                }
            } else if self.eat(&Token::LBracket) {
                let segment = match self.next() {
                    Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => Segment::Index(n as usize),
                    Some(Token::Str(key)) => Segment::Key(key),
                    _ => return Err("expected an index or a quoted key inside `[]`".to_string()),
                };
                if !self.eat(&Token::RBracket) {
                    return Err("missing `]`".to_string());
                }
                segments.push(segment);
            } else {
                return Ok(Path { root, segments });
            }
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}
