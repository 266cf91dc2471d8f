//! Lexer for the selection language.
//!
//! Tokens are produced one at a time so they can be pushed into the parser
//! as they are read. Lexical errors are reported as [`Token::Error`] and the
//! lexer resumes after the offending character.

use std::fmt;

/// A token with its byte span in the input string.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: (usize, usize),
}

/// Token types for the selection language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Keywords, method names, variables and bare atom names
    Ident(String),
    /// Double-quoted string
    Str(String),
    Integer(i64),
    Float(f64),
    LParen,
    RParen,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Plus,
    Dash,
    Star,
    Slash,
    Assign,
    Comma,
    Colon,
    /// `;` or end of line
    Separator,
    Error(String),
    Eof,
}

impl Token {
    pub fn is_word(&self, word: &str) -> bool {
        matches!(self, Token::Ident(s) if s == word)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{}'", s),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Integer(i) => write!(f, "{}", i),
            Token::Float(x) => write!(f, "{}", x),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Gt => f.write_str("'>'"),
            Token::Lt => f.write_str("'<'"),
            Token::Ge => f.write_str("'>='"),
            Token::Le => f.write_str("'<='"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::Plus => f.write_str("'+'"),
            Token::Dash => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Assign => f.write_str("'='"),
            Token::Comma => f.write_str("','"),
            Token::Colon => f.write_str("':'"),
            Token::Separator => f.write_str("end of statement"),
            Token::Error(msg) => f.write_str(msg),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'*' || b == b'?' || b == b'\''
}

/// Lexer over one piece of selection text.
pub struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
            done: false,
        }
    }

    pub fn input(&self) -> &'a str {
        self.input
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    /// Skip blanks, comments and line continuations (but not newlines).
    fn skip_trivia(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'#' => {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.pos += 1;
                    }
                }
                b'\\' => {
                    let mut k = 1;
                    if self.peek_at(k) == Some(b'\r') {
                        k += 1;
                    }
                    match self.peek_at(k) {
                        Some(b'\n') => self.pos += k + 1,
                        None => self.pos += k,
                        _ => break,
                    }
                }
                _ => break,
            }
        }
    }

    /// Next token; returns `Eof` forever once the input is exhausted.
    pub fn next_token(&mut self) -> SpannedToken {
        self.skip_trivia();
        let start = self.pos;
        let Some(ch) = self.peek() else {
            self.done = true;
            return SpannedToken {
                token: Token::Eof,
                span: (start, start),
            };
        };
        let token = match ch {
            b'\n' | b';' => {
                self.pos += 1;
                Token::Separator
            }
            b'(' => {
                self.pos += 1;
                Token::LParen
            }
            b')' => {
                self.pos += 1;
                Token::RParen
            }
            b',' => {
                self.pos += 1;
                Token::Comma
            }
            b':' => {
                self.pos += 1;
                Token::Colon
            }
            b'+' => {
                self.pos += 1;
                Token::Plus
            }
            b'-' => {
                self.pos += 1;
                Token::Dash
            }
            b'/' => {
                self.pos += 1;
                Token::Slash
            }
            b'>' => self.one_or_two(Token::Gt, Token::Ge),
            b'<' => self.one_or_two(Token::Lt, Token::Le),
            b'=' => self.one_or_two(Token::Assign, Token::Eq),
            b'!' => {
                self.pos += 1;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::Ne
                } else {
                    Token::Error("Expected '!=' operator".to_string())
                }
            }
            b'"' => self.lex_string(),
            b'*' if !self.peek_at(1).is_some_and(is_word_byte) => {
                self.pos += 1;
                Token::Star
            }
            b'0'..=b'9' => self.lex_number(),
            b if is_word_byte(b) => self.lex_word(),
            _ => {
                // skip the whole character so spans stay on UTF-8 boundaries
                let c = self.input[start..].chars().next().unwrap_or('?');
                self.pos += c.len_utf8();
                Token::Error(format!("Unexpected character '{}'", c))
            }
        };
        SpannedToken {
            token,
            span: (start, self.pos),
        }
    }

    fn one_or_two(&mut self, single: Token, with_eq: Token) -> Token {
        self.pos += 1;
        if self.peek() == Some(b'=') {
            self.pos += 1;
            with_eq
        } else {
            single
        }
    }

    fn lex_string(&mut self) -> Token {
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'"' {
                let s = self.input[start..self.pos].to_string();
                self.pos += 1;
                return Token::Str(s);
            }
            if b == b'\n' {
                break;
            }
            self.pos += 1;
        }
        Token::Error("Unterminated string".to_string())
    }

    fn lex_number(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign;
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        // atom names such as 1HB start with a digit
        if !is_float && self.peek().is_some_and(is_word_byte) {
            self.pos = start;
            return self.lex_word();
        }
        let s = &self.input[start..self.pos];
        if is_float {
            match s.parse() {
                Ok(v) => Token::Float(v),
                Err(_) => Token::Error(format!("Invalid float '{}'", s)),
            }
        } else {
            match s.parse() {
                Ok(v) => Token::Integer(v),
                Err(_) => Token::Error(format!("Invalid integer '{}'", s)),
            }
        }
    }

    fn lex_word(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(is_word_byte) {
            self.pos += 1;
        }
        Token::Ident(self.input[start..self.pos].to_string())
    }
}

impl Iterator for Lexer<'_> {
    type Item = SpannedToken;

    /// Yields tokens up to and including the first `Eof`.
    fn next(&mut self) -> Option<SpannedToken> {
        if self.done {
            None
        } else {
            Some(self.next_token())
        }
    }
}
