use thiserror::Error;
use tracing::warn;

use crate::token::{Token, TokenKind};

/// A non-fatal problem found while scanning a literal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexIssue {
    #[error("number overflow")]
    NumberOverflow,
    #[error("empty char constant")]
    EmptyCharConst,
    #[error("invalid escape sequence in char constant: \\{0}")]
    InvalidEscape(char),
    #[error("invalid char constant")]
    InvalidCharConst,
    #[error("unterminated char constant")]
    UnterminatedCharConst,
}

/// A `LexIssue` together with the position of the offending literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexDiagnostic {
    pub issue: LexIssue,
    pub line: usize,
    pub col: usize,
}

/// On-demand scanner: every call to `next` yields exactly one token.
///
/// Lines are 1-based, columns 0-based. Problems with number and char
/// literals never stop scanning; the token is produced with value 0 and the
/// problem is queued for the caller (see `take_issues`).
pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    issues: Vec<LexDiagnostic>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        let mut lexer = Lexer {
            source: Vec::new(),
            pos: 0,
            line: 1,
            col: 0,
            issues: Vec::new(),
        };
        lexer.init(source);
        lexer
    }

    /// Resets the lexer to the start of `source`.
    pub fn init(&mut self, source: &str) {
        self.source = source.chars().collect();
        self.pos = 0;
        self.line = 1;
        self.col = 0;
        self.issues.clear();
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        if ch == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch <= ' ' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn issue(&mut self, issue: LexIssue, token: &Token) {
        warn!(line = token.line, col = token.col, "{}", issue);
        self.issues.push(LexDiagnostic {
            issue,
            line: token.line,
            col: token.col,
        });
    }

    /// Drains the literal problems found since the last call.
    pub fn take_issues(&mut self) -> Vec<LexDiagnostic> {
        std::mem::take(&mut self.issues)
    }

    /// Returns the next token. At end of input this keeps returning `Eof`.
    pub fn next(&mut self) -> Token {
        loop {
            self.skip_whitespace();
            let mut token = Token::new(TokenKind::None, self.line, self.col);

            let Some(ch) = self.current() else {
                token.kind = TokenKind::Eof;
                return token;
            };

            if ch.is_ascii_alphabetic() {
                self.read_name(&mut token);
                return token;
            }
            if ch.is_ascii_digit() {
                self.read_number(&mut token);
                return token;
            }
            if ch == '\'' {
                self.read_char_const(&mut token);
                return token;
            }
            if ch == '/' && self.peek() == Some('/') {
                self.skip_line_comment();
                continue;
            }

            token.kind = self.read_operator(ch);
            return token;
        }
    }

    fn read_operator(&mut self, ch: char) -> TokenKind {
        self.advance();

        let followed_by_eq = self.current() == Some('=');

        match ch {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Times,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Rem,
            '=' if followed_by_eq => self.consume_eq(TokenKind::Eql),
            '=' => TokenKind::Assign,
            '!' if followed_by_eq => self.consume_eq(TokenKind::Neq),
            '<' if followed_by_eq => self.consume_eq(TokenKind::Leq),
            '<' => TokenKind::Lss,
            '>' if followed_by_eq => self.consume_eq(TokenKind::Geq),
            '>' => TokenKind::Gtr,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Period,
            '(' => TokenKind::LPar,
            ')' => TokenKind::RPar,
            '[' => TokenKind::LBrack,
            ']' => TokenKind::RBrack,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            // a lone '!' has no meaning either
            _ => TokenKind::None,
        }
    }

    fn consume_eq(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn read_name(&mut self, token: &mut Token) {
        let mut name = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        token.kind = TokenKind::keyword(&name).unwrap_or(TokenKind::Ident);
        token.text = name;
    }

    fn read_number(&mut self, token: &mut Token) {
        let mut digits = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        token.kind = TokenKind::Number;
        token.val = match digits.parse::<i32>() {
            Ok(value) => value,
            Err(_) => {
                self.issue(LexIssue::NumberOverflow, token);
                0
            }
        };
    }

    fn read_char_const(&mut self, token: &mut Token) {
        self.advance(); // opening quote

        let mut content = Vec::new();
        while let Some(ch) = self.current() {
            if ch == '\'' || ch == '\n' {
                break;
            }
            content.push(ch);
            self.advance();
        }
        let closed = self.current() == Some('\'');
        if closed {
            self.advance();
        }

        token.kind = TokenKind::CharConst;
        token.val = 0;
        if !closed {
            self.issue(LexIssue::UnterminatedCharConst, token);
            return;
        }
        match content.as_slice() {
            [] => self.issue(LexIssue::EmptyCharConst, token),
            [ch] if *ch != '\\' => token.val = *ch as i32,
            ['\\', escape] => match escape {
                't' => token.val = '\t' as i32,
                'r' => token.val = '\r' as i32,
                'n' => token.val = '\n' as i32,
                other => self.issue(LexIssue::InvalidEscape(*other), token),
            },
            _ => self.issue(LexIssue::InvalidCharConst, token),
        }
    }
}
