//! Lexical analysis. The lexer walks a byte buffer, tracks (position, line,
//! column), and exposes save/restore so the parser can backtrack.

use crate::error::{DbError, Result};

/// Token payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    /// Identifier or keyword. Keyword recognition is case-insensitive and
    /// happens at match sites via [Token::is_kw].
    Id(String),
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    BoolLit(bool),
    Null,
    /// Statement prefix that skips constraint validation. Reserved for the
    /// engine's own bootstrap inserts.
    UnsafeCon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Eof,
}

/// A token with its source position.
#[derive(Clone, Debug)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    pub col: u32,
}

impl Token {
    /// Case-insensitive keyword test.
    pub fn is_kw(&self, kw: &str) -> bool {
        matches!(&self.tok, Tok::Id(s) if s.eq_ignore_ascii_case(kw))
    }

    /// Identifier text, if this token is one.
    pub fn id(&self) -> Option<&str> {
        match &self.tok {
            Tok::Id(s) => Some(s),
            _ => None,
        }
    }
}

/// Saved lexer position, for parser backtracking and for the re-entrant
/// execution path ( the executor saves state before issuing an internal
/// statement and restores it afterwards ).
#[derive(Clone, Copy)]
pub struct LexerState {
    pos: usize,
    line: u32,
    col: u32,
}

impl LexerState {
    /// Byte offset into the source.
    pub fn offset(&self) -> usize {
        self.pos
    }
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn save(&self) -> LexerState {
        LexerState {
            pos: self.pos,
            line: self.line,
            col: self.col,
        }
    }

    pub fn restore(&mut self, st: LexerState) {
        self.pos = st.pos;
        self.line = st.line;
        self.col = st.col;
    }

    fn peek(&self) -> u8 {
        if self.pos < self.src.len() {
            self.src[self.pos]
        } else {
            0
        }
    }

    fn bump(&mut self) -> u8 {
        let c = self.peek();
        if c != 0 {
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
                self.col = 1;
            } else if (c & 192) != 128 {
                // UTF-8 continuation bytes do not advance the column.
                self.col += 1;
            }
        }
        c
    }

    fn skip_space(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'-' if self.pos + 1 < self.src.len() && self.src[self.pos + 1] == b'-' => {
                    while self.peek() != b'\n' && self.peek() != 0 {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn err(&self, msg: impl Into<String>) -> DbError {
        DbError::Syntax {
            msg: msg.into(),
            line: self.line,
            column: self.col,
        }
    }

    /// Read the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_space();
        let line = self.line;
        let col = self.col;
        let c = self.peek();
        let tok = match c {
            0 => Tok::Eof,
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                let start = self.pos;
                while matches!(self.peek(), b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_') {
                    self.bump();
                }
                let s = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
                if s.eq_ignore_ascii_case("null") {
                    Tok::Null
                } else if s.eq_ignore_ascii_case("true") {
                    Tok::BoolLit(true)
                } else if s.eq_ignore_ascii_case("false") {
                    Tok::BoolLit(false)
                } else if s == "_unsafecon" {
                    Tok::UnsafeCon
                } else {
                    Tok::Id(s.to_string())
                }
            }
            b'0'..=b'9' => {
                let start = self.pos;
                while self.peek().is_ascii_digit() {
                    self.bump();
                }
                if self.peek() == b'.'
                    && self.pos + 1 < self.src.len()
                    && self.src[self.pos + 1].is_ascii_digit()
                {
                    self.bump();
                    while self.peek().is_ascii_digit() {
                        self.bump();
                    }
                    let s = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
                    Tok::FloatLit(s.parse().map_err(|_| self.err("bad float literal"))?)
                } else {
                    let s = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
                    Tok::IntLit(s.parse().map_err(|_| self.err("integer literal out of range"))?)
                }
            }
            b'\'' | b'"' => {
                let quote = c;
                self.bump();
                let mut buf = Vec::new();
                loop {
                    let c = self.bump();
                    if c == 0 {
                        return Err(self.err("missing closing quote for string literal"));
                    }
                    if c == quote {
                        // Doubled quote is an escape.
                        if self.peek() == quote {
                            self.bump();
                            buf.push(quote);
                            continue;
                        }
                        break;
                    }
                    buf.push(c);
                }
                let s = String::from_utf8(buf)
                    .map_err(|_| self.err("string literal is not valid utf-8"))?;
                Tok::StrLit(s)
            }
            b'(' => {
                self.bump();
                Tok::LParen
            }
            b')' => {
                self.bump();
                Tok::RParen
            }
            b'[' => {
                self.bump();
                Tok::LBracket
            }
            b']' => {
                self.bump();
                Tok::RBracket
            }
            b'{' => {
                self.bump();
                Tok::LBrace
            }
            b'}' => {
                self.bump();
                Tok::RBrace
            }
            b',' => {
                self.bump();
                Tok::Comma
            }
            b';' => {
                self.bump();
                Tok::Semi
            }
            b'+' => {
                self.bump();
                Tok::Plus
            }
            b'-' => {
                self.bump();
                Tok::Minus
            }
            b'*' => {
                self.bump();
                Tok::Star
            }
            b'/' => {
                self.bump();
                Tok::Slash
            }
            b'%' => {
                self.bump();
                Tok::Percent
            }
            b'=' => {
                self.bump();
                if self.peek() == b'=' {
                    self.bump();
                }
                Tok::Eq
            }
            b'!' => {
                self.bump();
                if self.peek() == b'=' {
                    self.bump();
                    Tok::Neq
                } else {
                    return Err(self.err("unexpected '!'"));
                }
            }
            b'<' => {
                self.bump();
                match self.peek() {
                    b'=' => {
                        self.bump();
                        Tok::Le
                    }
                    b'>' => {
                        self.bump();
                        Tok::Neq
                    }
                    _ => Tok::Lt,
                }
            }
            b'>' => {
                self.bump();
                if self.peek() == b'=' {
                    self.bump();
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            _ => return Err(self.err(format!("unexpected character '{}'", c as char))),
        };
        Ok(Token { tok, line, col })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        let mut lx = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let t = lx.next_token().unwrap();
            let end = t.tok == Tok::Eof;
            out.push(t.tok);
            if end {
                break;
            }
        }
        out
    }

    #[test]
    fn basic_stream() {
        let t = toks("SELECT id, name FROM t WHERE x >= 1.5;");
        assert_eq!(t[0], Tok::Id("SELECT".into()));
        assert!(t.contains(&Tok::Ge));
        assert!(t.contains(&Tok::FloatLit(1.5)));
        assert_eq!(*t.last().unwrap(), Tok::Eof);
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(toks("'ab''c'")[0], Tok::StrLit("ab'c".into()));
        assert_eq!(toks("\"xy\"")[0], Tok::StrLit("xy".into()));
    }

    #[test]
    fn null_bool_unsafecon() {
        assert_eq!(toks("NULL")[0], Tok::Null);
        assert_eq!(toks("TRUE")[0], Tok::BoolLit(true));
        assert_eq!(toks("_unsafecon")[0], Tok::UnsafeCon);
    }

    #[test]
    fn save_restore_backtracks() {
        let mut lx = Lexer::new("a b c");
        let _a = lx.next_token().unwrap();
        let st = lx.save();
        let b1 = lx.next_token().unwrap();
        lx.restore(st);
        let b2 = lx.next_token().unwrap();
        assert_eq!(b1.tok, b2.tok);
    }

    #[test]
    fn comments_and_positions() {
        let mut lx = Lexer::new("-- comment\n  x");
        let t = lx.next_token().unwrap();
        assert_eq!(t.tok, Tok::Id("x".into()));
        assert_eq!(t.line, 2);
        assert_eq!(t.col, 3);
    }
}
