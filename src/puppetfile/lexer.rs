//! Tokenizer for the Puppetfile language.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare identifier: `mod`, `forge`, `true`
    Ident(String),
    /// Quoted string with escapes already applied
    Str(String),
    /// `:name` or `:"name"`
    Symbol(String),
    /// `name:` as a hash key
    Label(String),
    Arrow,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub struct Lexer<'a> {
    file: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a str, source: &str) -> Self {
        Self {
            file,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    /// Tokenize the whole input. The result always ends with `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::PuppetfileParse {
            file: self.file.to_string(),
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn token(&self, kind: TokenKind, line: usize) -> Token {
        Token { kind, line }
    }

    fn next_token(&mut self) -> Result<Token> {
        // Horizontal whitespace and comments
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('\\') if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }

        let line = self.line;
        let c = match self.bump() {
            Some(c) => c,
            None => return Ok(self.token(TokenKind::Eof, line)),
        };

        let kind = match c {
            '\n' => TokenKind::Newline,
            ';' => TokenKind::Newline,
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '=' if self.peek() == Some('>') => {
                self.bump();
                TokenKind::Arrow
            }
            '\'' => TokenKind::Str(self.single_quoted()?),
            '"' => TokenKind::Str(self.double_quoted()?),
            ':' => self.symbol()?,
            c if is_ident_start(c) => {
                let mut ident = c.to_string();
                while let Some(c) = self.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    ident.push(c);
                    self.bump();
                }
                // `key: value`, but not `Foo::Bar`
                if self.peek() == Some(':') && self.peek_at(1) != Some(':') {
                    self.bump();
                    TokenKind::Label(ident)
                } else {
                    TokenKind::Ident(ident)
                }
            }
            other => return Err(self.error(format!("unexpected character '{}'", other))),
        };
        Ok(self.token(kind, line))
    }

    fn symbol(&mut self) -> Result<TokenKind> {
        match self.peek() {
            Some('"') => {
                self.bump();
                Ok(TokenKind::Symbol(self.double_quoted()?))
            }
            Some('\'') => {
                self.bump();
                Ok(TokenKind::Symbol(self.single_quoted()?))
            }
            Some(c) if is_ident_start(c) => {
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    name.push(c);
                    self.bump();
                }
                Ok(TokenKind::Symbol(name))
            }
            _ => Err(self.error("expected a symbol name after ':'")),
        }
    }

    fn single_quoted(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('\'') => return Ok(out),
                Some('\\') => match self.peek() {
                    Some('\'') | Some('\\') => {
                        if let Some(c) = self.bump() {
                            out.push(c);
                        }
                    }
                    _ => out.push('\\'),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn double_quoted(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(out),
                Some('#') if self.peek() == Some('{') => {
                    return Err(self.error("string interpolation is not supported"));
                }
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('0') => out.push('\0'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }
}
