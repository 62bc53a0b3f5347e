//! Where-expressions: boolean filters over record fields.
//!
//! ```text
//! age > 30 and (name = 'Alice' or not active = true)
//! ```
//!
//! A comparison is `field OP literal` with `OP` one of `= == != <> < <= > >=`.
//! Comparisons combine with `and`/`&&`, `or`/`||` and `not`/`!`, and group
//! with parentheses. Literals are bare words, single or double quoted text,
//! or `null`; they are parsed with the type of the field they are compared to.

use crate::error::{EdiError, Result};
use crate::record::Record;
use crate::value::{parse_value, Field};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Deepest nesting of `not` and parentheses the parser accepts.
const MAX_DEPTH: usize = 256;

/// A parsed where-expression.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Text(String),
}

#[derive(Debug, Clone)]
enum Node {
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Compare {
        field: String,
        op: CmpOp,
        literal: Literal,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Quoted(String),
    Word(String),
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(parser.error(&format!("unexpected {token:?}")));
        }
        Ok(Expression {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a record. Fails only when a literal cannot be parsed
    /// as the type of the field it is compared with.
    pub fn matches(&self, record: &Record) -> Result<bool> {
        eval(&self.root, record)
    }
}

impl FromStr for Expression {
    type Err = EdiError;

    fn from_str(s: &str) -> Result<Self> {
        Expression::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval(node: &Node, record: &Record) -> Result<bool> {
    match node {
        Node::And(a, b) => Ok(eval(a, record)? && eval(b, record)?),
        Node::Or(a, b) => Ok(eval(a, record)? || eval(b, record)?),
        Node::Not(inner) => Ok(!eval(inner, record)?),
        Node::Compare { field, op, literal } => match record.field(field) {
            Some(f) => compare(f, *op, literal),
            None => Ok(false),
        },
    }
}

fn compare(field: &Field, op: CmpOp, literal: &Literal) -> Result<bool> {
    let text = match literal {
        Literal::Null => {
            return Ok(match op {
                CmpOp::Eq => field.is_null(),
                CmpOp::Ne => !field.is_null(),
                _ => false,
            })
        }
        Literal::Text(text) => text,
    };
    let rhs = parse_value(text, field.type_tag())?;
    let Some(lhs) = field.value() else {
        return Ok(op == CmpOp::Ne);
    };
    let ordering = lhs.compare(&rhs);
    Ok(match op {
        CmpOp::Eq => ordering == Some(Ordering::Equal),
        CmpOp::Ne => ordering != Some(Ordering::Equal),
        CmpOp::Lt => ordering == Some(Ordering::Less),
        CmpOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ordering == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    })
}

// ── Tokenizer ───────────────────────────────────────────────────────

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^\s*(?:(\|\||&&|==|!=|<>|<=|>=|=|<|>|!|\(|\))|'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)"|([^\s()=!<>&|'"]+))"#,
        )
        .expect("token regex is valid")
    })
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let re = token_regex();
    let mut tokens = Vec::new();
    let mut rest = source;

    while !rest.trim_start().is_empty() {
        let caps = re.captures(rest).ok_or_else(|| {
            EdiError::Query(format!(
                "cannot parse '{}' in expression '{source}'",
                rest.trim_start()
            ))
        })?;
        let token = if let Some(sym) = caps.get(1) {
            match sym.as_str() {
                "||" => Token::Or,
                "&&" => Token::And,
                "!" => Token::Not,
                "(" => Token::LParen,
                ")" => Token::RParen,
                "=" | "==" => Token::Op(CmpOp::Eq),
                "!=" | "<>" => Token::Op(CmpOp::Ne),
                "<" => Token::Op(CmpOp::Lt),
                "<=" => Token::Op(CmpOp::Le),
                ">" => Token::Op(CmpOp::Gt),
                _ => Token::Op(CmpOp::Ge),
            }
        } else if let Some(quoted) = caps.get(2).or_else(|| caps.get(3)) {
            Token::Quoted(unescape(quoted.as_str()))
        } else {
            let word = &caps[4];
            match word.to_ascii_lowercase().as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                _ => Token::Word(word.to_string()),
            }
        };
        tokens.push(token);
        rest = &rest[caps[0].len()..];
    }
    Ok(tokens)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ── Parser ──────────────────────────────────────────────────────────

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str) -> EdiError {
        EdiError::Query(format!("{message} in expression '{}'", self.source))
    }

    fn parse_or(&mut self) -> Result<Node> {
        let mut node = self.parse_and()?;
        while self.eat(&Token::Or) {
            node = Node::Or(Box::new(node), Box::new(self.parse_and()?));
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Node> {
        let mut node = self.parse_unary()?;
        while self.eat(&Token::And) {
            node = Node::And(Box::new(node), Box::new(self.parse_unary()?));
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Node> {
        if self.eat(&Token::Not) {
            let inner = self.nested(Self::parse_unary)?;
            return Ok(Node::Not(Box::new(inner)));
        }
        if self.eat(&Token::LParen) {
            let node = self.nested(Self::parse_or)?;
            if !self.eat(&Token::RParen) {
                return Err(self.error("missing ')'"));
            }
            return Ok(node);
        }
        self.parse_comparison()
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Node>) -> Result<Node> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let node = parse(self);
        self.depth -= 1;
        node
    }

    fn parse_comparison(&mut self) -> Result<Node> {
        let field = match self.next() {
            Some(Token::Word(word)) => word,
            Some(other) => return Err(self.error(&format!("expected a field name, got {other:?}"))),
            None => return Err(self.error("expected a field name")),
        };
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            _ => return Err(self.error(&format!("expected a comparison after '{field}'"))),
        };
        let literal = match self.next() {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("null") => Literal::Null,
            Some(Token::Word(word)) | Some(Token::Quoted(word)) => Literal::Text(word),
            _ => return Err(self.error(&format!("expected a value after '{field}'"))),
        };
        Ok(Node::Compare { field, op, literal })
    }
}
