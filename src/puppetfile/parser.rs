//! Parses Puppetfile tokens into a flat list of calls.
//!
//! The language is a restricted Ruby subset: every statement is a call of an
//! identifier with optional parentheses, and arguments are literals. Trailing
//! `key => value` or `key: value` pairs are gathered into one hash argument,
//! the way Ruby treats an implicit trailing hash.

use std::fmt;

use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Symbol(String),
    Bool(bool),
    Nil,
    Array(Vec<Value>),
    Hash(Vec<(String, Value)>),
}

impl Value {
    /// String content of a string or symbol.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Hash(pairs) => Some(pairs),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Symbol(s) => write!(f, ":{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Nil => write!(f, "nil"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, ":{} => {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// One top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Value>,
    pub line: usize,
}

pub struct Parser<'a> {
    file: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(file: &'a str, source: &str) -> Result<Self> {
        let tokens = Lexer::new(file, source).tokenize()?;
        Ok(Self {
            file,
            tokens,
            pos: 0,
        })
    }

    pub fn parse(mut self) -> Result<Vec<Call>> {
        let mut calls = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&TokenKind::Eof) {
                return Ok(calls);
            }
            calls.push(self.call()?);
            match self.peek().kind {
                TokenKind::Newline | TokenKind::Eof => {}
                _ => return Err(self.unexpected("end of statement")),
            }
        }
    }

    fn peek(&self) -> &Token {
        // tokenize() always ends with Eof, so the last token is a safe default
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn skip_newlines(&mut self) {
        while self.at(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<()> {
        if self.at(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn error_at(&self, line: usize, message: impl Into<String>) -> Error {
        Error::PuppetfileParse {
            file: self.file.to_string(),
            line,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Ident(s) => format!("identifier '{}'", s),
            TokenKind::Str(s) => format!("string {:?}", s),
            TokenKind::Symbol(s) => format!("symbol :{}", s),
            TokenKind::Label(s) => format!("label '{}:'", s),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            other => format!("{:?}", other),
        };
        self.error_at(token.line, format!("expected {}, found {}", expected, found))
    }

    fn call(&mut self) -> Result<Call> {
        let token = self.advance();
        let name = match token.kind {
            TokenKind::Ident(name) => name,
            _ => {
                self.pos -= 1;
                return Err(self.unexpected("a method call"));
            }
        };

        let args = if self.at(&TokenKind::LParen) {
            self.advance();
            self.skip_newlines();
            let args = self.arguments(true)?;
            self.skip_newlines();
            self.expect(TokenKind::RParen, "')'")?;
            args
        } else {
            match self.peek().kind {
                TokenKind::Newline | TokenKind::Eof => Vec::new(),
                _ => self.arguments(false)?,
            }
        };

        Ok(Call {
            name,
            args,
            line: token.line,
        })
    }

    fn arguments(&mut self, in_parens: bool) -> Result<Vec<Value>> {
        let mut args = Vec::new();
        let mut trailing: Vec<(String, Value)> = Vec::new();

        if in_parens && self.at(&TokenKind::RParen) {
            return Ok(args);
        }

        loop {
            if let Some(key) = self.pair_key()? {
                let value = self.value()?;
                trailing.push((key, value));
            } else {
                if !trailing.is_empty() {
                    return Err(self.unexpected("a key => value pair"));
                }
                args.push(self.value()?);
            }

            if !self.at(&TokenKind::Comma) {
                break;
            }
            self.advance();
            self.skip_newlines();
            if in_parens && self.at(&TokenKind::RParen) {
                break;
            }
        }

        if !trailing.is_empty() {
            args.push(Value::Hash(trailing));
        }
        Ok(args)
    }

    /// Consume `key =>` or `key:` when present.
    fn pair_key(&mut self) -> Result<Option<String>> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Label(key) => {
                self.advance();
                self.skip_newlines();
                Ok(Some(key))
            }
            TokenKind::Symbol(key) | TokenKind::Str(key) => {
                let next = self.tokens.get(self.pos + 1).map(|t| &t.kind);
                if next == Some(&TokenKind::Arrow) {
                    self.advance();
                    self.advance();
                    self.skip_newlines();
                    Ok(Some(key))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    fn value(&mut self) -> Result<Value> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) => Ok(Value::Str(s)),
            TokenKind::Symbol(s) => Ok(Value::Symbol(s)),
            TokenKind::Ident(ident) => match ident.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "nil" => Ok(Value::Nil),
                _ => Err(self.error_at(
                    token.line,
                    format!("unexpected identifier '{}' in argument list", ident),
                )),
            },
            TokenKind::LBracket => {
                let mut items = Vec::new();
                self.skip_newlines();
                while !self.at(&TokenKind::RBracket) {
                    items.push(self.value()?);
                    self.skip_newlines();
                    if self.at(&TokenKind::Comma) {
                        self.advance();
                        self.skip_newlines();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Value::Array(items))
            }
            TokenKind::LBrace => {
                let mut pairs = Vec::new();
                self.skip_newlines();
                while !self.at(&TokenKind::RBrace) {
                    let key = match self.pair_key()? {
                        Some(key) => key,
                        None => return Err(self.unexpected("a key => value pair")),
                    };
                    pairs.push((key, self.value()?));
                    self.skip_newlines();
                    if self.at(&TokenKind::Comma) {
                        self.advance();
                        self.skip_newlines();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace, "'}'")?;
                Ok(Value::Hash(pairs))
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected("a value"))
            }
        }
    }
}

/// Parse Puppetfile source text into calls.
pub fn parse(file: &str, source: &str) -> Result<Vec<Call>> {
    Parser::new(file, source)?.parse()
}
