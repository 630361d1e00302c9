//! Token types for the free-form Fortran subset.
//!
//! Fortran has no reserved words, so keywords are ordinary identifiers
//! and the parsers match them case-insensitively.

use crate::utils::location::Span;
use std::fmt;

/// A token in the source code.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The source span
    pub span: Span,
    /// The lexeme (raw text)
    pub lexeme: String,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, lexeme: String) -> Self {
        Self { kind, span, lexeme }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    /// Is this the identifier `word`, ignoring case?
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Identifier && self.lexeme.eq_ignore_ascii_case(word)
    }

    /// Lower-cased lexeme, the canonical form of Fortran names.
    pub fn lower(&self) -> String {
        self.lexeme.to_ascii_lowercase()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.lexeme)
    }
}

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    /// Integer literal, optionally with a kind suffix (`1_i_def`)
    Integer,
    /// Real literal (`1.0`, `2.5e-3_r_def`, `1.0d0`)
    Real,
    /// Character literal in single or double quotes
    String,
    /// `.true.` / `.false.`
    Logical,

    /// Identifier (also every keyword)
    Identifier,

    // Operators
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `**`
    Power,
    /// `/`
    Slash,
    /// `//`
    Concat,
    /// `=`
    Equal,
    /// `==`
    EqualEqual,
    /// `/=`
    SlashEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `=>`
    Arrow,
    /// `.and.`, `.eq.` and other dotted operators
    DotOperator,

    // Delimiters
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `(/`
    LeftArrayCtor,
    /// `/)`
    RightArrayCtor,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `::`
    DoubleColon,
    /// `%`
    Percent,

    // Special
    /// End of a statement (newline or `;`)
    EndOfStatement,
    /// End of file
    Eof,
}

impl TokenKind {
    pub fn is_literal(&self) -> bool {
        matches!(self, TokenKind::Integer | TokenKind::Real | TokenKind::String | TokenKind::Logical)
    }

    /// Opening delimiters tracked for nesting depth.
    pub fn opens(&self) -> bool {
        matches!(self, TokenKind::LeftParen | TokenKind::LeftArrayCtor | TokenKind::LeftBracket)
    }

    pub fn closes(&self) -> bool {
        matches!(self, TokenKind::RightParen | TokenKind::RightArrayCtor | TokenKind::RightBracket)
    }

    /// Get a human-readable name for this token kind.
    pub fn name(&self) -> &'static str {
        use TokenKind::*;
        match self {
            Integer => "integer",
            Real => "real",
            String => "string",
            Logical => "logical",
            Identifier => "identifier",
            Plus => "+",
            Minus => "-",
            Star => "*",
            Power => "**",
            Slash => "/",
            Concat => "//",
            Equal => "=",
            EqualEqual => "==",
            SlashEqual => "/=",
            Less => "<",
            LessEqual => "<=",
            Greater => ">",
            GreaterEqual => ">=",
            Arrow => "=>",
            DotOperator => "dotted operator",
            LeftParen => "(",
            RightParen => ")",
            LeftArrayCtor => "(/",
            RightArrayCtor => "/)",
            LeftBracket => "[",
            RightBracket => "]",
            Comma => ",",
            Colon => ":",
            DoubleColon => "::",
            Percent => "%",
            EndOfStatement => "end of statement",
            Eof => "end of file",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
