/// Token classes produced by the lexer.
///
/// `None` is the error class: an unrecognized character, or a `!` that is
/// not followed by `=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    None,
    Ident,
    Number,
    CharConst,

    // Arithmetic
    Plus,
    Minus,
    Times,
    Slash,
    Rem,

    // Comparison
    Eql,
    Neq,
    Lss,
    Leq,
    Gtr,
    Geq,

    // Punctuation
    Assign,
    Semicolon,
    Comma,
    Period,
    LPar,
    RPar,
    LBrack,
    RBrack,
    LBrace,
    RBrace,

    // Keywords
    Class,
    Else,
    Final,
    If,
    New,
    Print,
    Program,
    Read,
    Return,
    Void,
    While,

    Eof,
}

/// Keyword table, sorted by spelling so it can be binary searched.
pub(crate) const KEYWORDS: [(&str, TokenKind); 11] = [
    ("class", TokenKind::Class),
    ("else", TokenKind::Else),
    ("final", TokenKind::Final),
    ("if", TokenKind::If),
    ("new", TokenKind::New),
    ("print", TokenKind::Print),
    ("program", TokenKind::Program),
    ("read", TokenKind::Read),
    ("return", TokenKind::Return),
    ("void", TokenKind::Void),
    ("while", TokenKind::While),
];

impl TokenKind {
    /// Looks up an identifier spelling in the keyword table.
    pub fn keyword(spelling: &str) -> Option<TokenKind> {
        KEYWORDS
            .binary_search_by(|(word, _)| (*word).cmp(spelling))
            .ok()
            .map(|i| KEYWORDS[i].1)
    }

    /// Name used in "X expected" diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::None => "none",
            TokenKind::Ident => "identifier",
            TokenKind::Number => "number",
            TokenKind::CharConst => "char constant",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Times => "*",
            TokenKind::Slash => "/",
            TokenKind::Rem => "%",
            TokenKind::Eql => "==",
            TokenKind::Neq => "!=",
            TokenKind::Lss => "<",
            TokenKind::Leq => "<=",
            TokenKind::Gtr => ">",
            TokenKind::Geq => ">=",
            TokenKind::Assign => "=",
            TokenKind::Semicolon => ";",
            TokenKind::Comma => ",",
            TokenKind::Period => ".",
            TokenKind::LPar => "(",
            TokenKind::RPar => ")",
            TokenKind::LBrack => "[",
            TokenKind::RBrack => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Class => "class",
            TokenKind::Else => "else",
            TokenKind::Final => "final",
            TokenKind::If => "if",
            TokenKind::New => "new",
            TokenKind::Print => "print",
            TokenKind::Program => "program",
            TokenKind::Read => "read",
            TokenKind::Return => "return",
            TokenKind::Void => "void",
            TokenKind::While => "while",
            TokenKind::Eof => "eof",
        }
    }

    /// Returns true for tokens that may begin an expression.
    pub fn starts_expr(self) -> bool {
        matches!(
            self,
            TokenKind::Ident
                | TokenKind::Number
                | TokenKind::CharConst
                | TokenKind::New
                | TokenKind::LPar
                | TokenKind::Minus
        )
    }

    /// Returns true for tokens that may begin a statement.
    pub fn starts_statement(self) -> bool {
        matches!(
            self,
            TokenKind::Ident
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Read
                | TokenKind::Return
                | TokenKind::Print
                | TokenKind::LBrace
                | TokenKind::Semicolon
        )
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single lexed token.
///
/// `text` is only filled in for identifiers and keywords; `val` holds the
/// decoded value of number and char literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
    pub text: String,
    pub val: i32,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, col: usize) -> Self {
        Token {
            kind,
            line,
            col,
            text: String::new(),
            val: 0,
        }
    }
}

impl Default for Token {
    fn default() -> Self {
        Token::new(TokenKind::None, 1, 0)
    }
}
