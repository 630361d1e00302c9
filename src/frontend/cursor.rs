//! Token cursor shared by the metadata and algorithm parsers.
//!
//! Both parsers only care about a handful of statement shapes and skip
//! everything else a statement at a time.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::errors::{ParseError, ParseErrorKind};
use crate::utils::location::Span;

pub struct TokenCursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenCursor {
    /// `tokens` must end with `Eof`, as produced by `Lexer::tokenize`.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    /// Token `n` places ahead of the current one.
    pub fn peek(&self, n: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + n).min(last)]
    }

    pub fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn rewind(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    pub fn check_word(&self, word: &str) -> bool {
        self.current().is_word(word)
    }

    pub fn is_at_end(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    pub fn at_statement_end(&self) -> bool {
        self.check(TokenKind::EndOfStatement) || self.is_at_end()
    }

    pub fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.pos += 1;
        }
        self.previous()
    }

    pub fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn match_word(&mut self, word: &str) -> bool {
        if self.check_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(ParseErrorKind::ExpectedToken, message).expecting(kind.name()))
        }
    }

    pub fn consume_word(&mut self, word: &str) -> Result<(), ParseError> {
        if self.match_word(word) {
            Ok(())
        } else {
            Err(self
                .error(ParseErrorKind::ExpectedToken, &format!("Expected '{}'", word))
                .expecting(word))
        }
    }

    /// Consume an identifier and return it lower-cased.
    pub fn consume_identifier(&mut self, message: &str) -> Result<String, ParseError> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance().lower())
        } else {
            Err(self.error(ParseErrorKind::ExpectedIdentifier, message).expecting("identifier"))
        }
    }

    pub fn error(&self, kind: ParseErrorKind, message: &str) -> ParseError {
        let tok = self.current();
        let kind = if tok.is_eof() { ParseErrorKind::UnexpectedEof } else { kind };
        ParseError::new(kind, message, tok.span).with_found(tok.kind.name())
    }

    /// Skip to the start of the next statement.
    pub fn skip_statement(&mut self) {
        while !self.at_statement_end() {
            self.advance();
        }
        self.match_token(TokenKind::EndOfStatement);
    }

    /// Expect the current statement to be finished.
    pub fn end_statement(&mut self) -> Result<(), ParseError> {
        if self.match_token(TokenKind::EndOfStatement) || self.is_at_end() {
            Ok(())
        } else {
            Err(self.error(ParseErrorKind::UnexpectedToken, "Expected end of statement"))
        }
    }

    /// Having just consumed an opening delimiter, collect tokens up to the
    /// matching closer (consumed, not returned).
    pub fn collect_balanced(&mut self, open_span: Span) -> Result<Vec<Token>, ParseError> {
        let mut depth = 1usize;
        let mut out = Vec::new();
        loop {
            let tok = self.current().clone();
            if tok.is_eof() || tok.kind == TokenKind::EndOfStatement {
                return Err(ParseError::new(
                    ParseErrorKind::MismatchedDelimiter,
                    "Unclosed delimiter",
                    open_span,
                ));
            }
            self.advance();
            if tok.kind.opens() {
                depth += 1;
            } else if tok.kind.closes() {
                depth -= 1;
                if depth == 0 {
                    return Ok(out);
                }
            }
            out.push(tok);
        }
    }
}

/// Split a token list on top-level commas.
pub fn split_top_level(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, tok) in tokens.iter().enumerate() {
        if tok.kind.opens() {
            depth += 1;
        } else if tok.kind.closes() {
            depth = depth.saturating_sub(1);
        } else if tok.kind == TokenKind::Comma && depth == 0 {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    if start < tokens.len() || !parts.is_empty() {
        parts.push(&tokens[start..]);
    }
    parts
}

/// Span covering a non-empty token slice.
pub fn span_of(tokens: &[Token]) -> Span {
    match (tokens.first(), tokens.last()) {
        (Some(a), Some(b)) => a.span.merge(&b.span),
        _ => Span::dummy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn cursor(src: &str) -> TokenCursor {
        TokenCursor::new(Lexer::new(src).tokenize().unwrap())
    }

    #[test]
    fn test_collect_balanced_and_split() {
        let mut c = cursor("f(a(1, 2), b%c, (/ 1, 2 /)) x");
        c.advance();
        let open = c.advance().span;
        let inner = c.collect_balanced(open).unwrap();
        let parts = split_top_level(&inner);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 6);
        assert!(c.check_word("x"));
    }

    #[test]
    fn test_unclosed_delimiter() {
        let mut c = cursor("f(a, b\ny");
        c.advance();
        let open = c.advance().span;
        let err = c.collect_balanced(open).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MismatchedDelimiter);
    }

    #[test]
    fn test_skip_statement() {
        let mut c = cursor("integer :: i = 3\nreal :: x");
        c.skip_statement();
        assert!(c.check_word("real"));
    }

    #[test]
    fn test_split_empty() {
        assert!(split_top_level(&[]).is_empty());
    }
}
