//! Lexer for free-form Fortran.
//!
//! The lexer converts source text into a stream of tokens. Statement
//! boundaries are significant in Fortran, so newlines and `;` become
//! [`TokenKind::EndOfStatement`]; `&` continuations, `!` comments and
//! preprocessor lines are consumed here and never reach the parsers.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::location::{Span, SourceLocation};
use crate::utils::errors::{LexerError, LexerErrorKind};
use unicode_xid::UnicodeXID;
use std::iter::Peekable;
use std::str::Chars;

/// A lexer for tokenizing source code.
pub struct Lexer<'a> {
    /// The source text
    source: &'a str,
    /// Character iterator
    chars: Peekable<Chars<'a>>,
    /// Current byte offset
    offset: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
    /// Start of current token
    token_start: SourceLocation,
    /// Kind of the last token handed out, used to collapse blank lines
    last_kind: TokenKind,
    /// Whether we've hit EOF
    at_eof: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().peekable(),
            offset: 0,
            line: 1,
            column: 1,
            token_start: SourceLocation::start(),
            last_kind: TokenKind::EndOfStatement,
            at_eof: false,
        }
    }

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.offset)
    }

    fn mark_token_start(&mut self) {
        self.token_start = self.current_location();
    }

    fn make_span(&self) -> Span {
        Span::from_locations(self.token_start, self.current_location())
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Peek `n` characters past the current one.
    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.offset..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_to_line_end(&mut self) {
        while self.peek().is_some() && self.peek() != Some('\n') {
            self.advance();
        }
    }

    /// Skip blanks, comments, preprocessor lines and continuations.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('!') => self.skip_to_line_end(),
                Some('#') if self.column == 1 => self.skip_to_line_end(),
                Some('&') => {
                    self.advance();
                    self.skip_continuation();
                }
                _ => break,
            }
        }
    }

    /// After a trailing `&`: drop the rest of the line, any blank or
    /// comment-only lines, and an optional leading `&` on the next line.
    fn skip_continuation(&mut self) {
        self.skip_to_line_end();
        self.advance();
        loop {
            while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
                self.advance();
            }
            match self.peek() {
                Some('!') | Some('\n') => {
                    self.skip_to_line_end();
                    if self.advance().is_none() {
                        return;
                    }
                }
                Some('&') => {
                    self.advance();
                    return;
                }
                _ => return,
            }
        }
    }

    fn make_token(&mut self, kind: TokenKind) -> Token {
        let span = self.make_span();
        let lexeme = self.source[span.start_offset..span.end_offset].to_string();
        self.last_kind = kind;
        Token::new(kind, span, lexeme)
    }

    fn make_error(&self, message: &str, kind: LexerErrorKind) -> LexerError {
        LexerError {
            message: message.to_string(),
            span: self.make_span(),
            kind,
        }
    }

    fn eat_digits(&mut self) {
        while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.advance();
        }
    }

    /// Optional `_kind` suffix on a numeric or logical literal.
    fn eat_kind_suffix(&mut self) {
        if self.peek() == Some('_')
            && self.peek_nth(1).map(|c| c.is_xid_continue()).unwrap_or(false)
        {
            self.advance();
            while self.peek().map(|c| c.is_xid_continue()).unwrap_or(false) {
                self.advance();
            }
        }
    }

    fn at_exponent(&self) -> bool {
        let e = self.peek_nth(0);
        if !matches!(e, Some('e') | Some('E') | Some('d') | Some('D')) {
            return false;
        }
        match self.peek_nth(1) {
            Some(c) if c.is_ascii_digit() => true,
            Some('+') | Some('-') => self.peek_nth(2).map(|c| c.is_ascii_digit()).unwrap_or(false),
            _ => false,
        }
    }

    /// Scan a numeric literal whose first digit (or `.`) is consumed.
    fn scan_number(&mut self, leading_dot: bool) -> Result<Token, LexerError> {
        self.eat_digits();
        let mut is_real = leading_dot;

        if !leading_dot && self.peek() == Some('.') {
            // `1.eq.2` keeps the dot for the operator.
            let next = self.peek_nth(1);
            let dotted_op = next.map(|c| c.is_ascii_alphabetic()).unwrap_or(false) && {
                let mut tmp = self.source[self.offset + 1..].chars();
                let word: String = tmp.by_ref().take_while(|c| c.is_ascii_alphabetic()).collect();
                self.source[self.offset + 1 + word.len()..].starts_with('.') && !self.at_exponent_after_dot()
            };
            if !dotted_op {
                is_real = true;
                self.advance();
                self.eat_digits();
            }
        }

        if self.at_exponent() {
            is_real = true;
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            self.eat_digits();
        } else if matches!(self.peek(), Some('e') | Some('E') | Some('d') | Some('D'))
            && is_real
            && matches!(self.peek_nth(1), Some('+') | Some('-'))
        {
            return Err(self.make_error(
                "Invalid floating-point exponent",
                LexerErrorKind::InvalidNumber,
            ));
        }

        self.eat_kind_suffix();
        Ok(self.make_token(if is_real { TokenKind::Real } else { TokenKind::Integer }))
    }

    /// `1.e5` style: dot directly followed by an exponent.
    fn at_exponent_after_dot(&self) -> bool {
        let mut it = self.source[self.offset + 1..].chars();
        match it.next() {
            Some('e') | Some('E') | Some('d') | Some('D') => {}
            _ => return false,
        }
        match it.next() {
            Some(c) if c.is_ascii_digit() => true,
            Some('+') | Some('-') => it.next().map(|c| c.is_ascii_digit()).unwrap_or(false),
            _ => false,
        }
    }

    fn scan_identifier(&mut self) -> Token {
        while self.peek().map(|c| c.is_xid_continue()).unwrap_or(false) {
            self.advance();
        }
        self.make_token(TokenKind::Identifier)
    }

    /// `.and.`, `.not.`, `.true.` and friends; the leading dot is consumed.
    fn scan_dot_word(&mut self) -> Result<Token, LexerError> {
        let start = self.offset;
        while self.peek().map(|c| c.is_ascii_alphabetic()).unwrap_or(false) {
            self.advance();
        }
        let word = self.source[start..self.offset].to_ascii_lowercase();
        if !self.match_char('.') {
            return Err(self.make_error(
                &format!("Unterminated dotted operator '.{}'", word),
                LexerErrorKind::InvalidDotOperator,
            ));
        }
        if word == "true" || word == "false" {
            self.eat_kind_suffix();
            Ok(self.make_token(TokenKind::Logical))
        } else {
            Ok(self.make_token(TokenKind::DotOperator))
        }
    }

    fn scan_string(&mut self, quote: char) -> Result<Token, LexerError> {
        loop {
            match self.advance() {
                Some(c) if c == quote => {
                    // A doubled quote is an escaped quote.
                    if self.peek() == Some(quote) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some('\n') | None => {
                    return Err(self.make_error(
                        "Unterminated character literal",
                        LexerErrorKind::UnterminatedString,
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(self.make_token(TokenKind::String))
    }

    /// Scan the next token.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        loop {
            self.skip_whitespace();
            self.mark_token_start();

            let c = match self.advance() {
                Some(c) => c,
                None => {
                    self.at_eof = true;
                    return Ok(self.make_token(TokenKind::Eof));
                }
            };

            let token = match c {
                '\n' | ';' => {
                    if self.last_kind == TokenKind::EndOfStatement {
                        continue;
                    }
                    self.make_token(TokenKind::EndOfStatement)
                }
                '(' => {
                    if self.match_char('/') {
                        self.make_token(TokenKind::LeftArrayCtor)
                    } else {
                        self.make_token(TokenKind::LeftParen)
                    }
                }
                ')' => self.make_token(TokenKind::RightParen),
                '[' => self.make_token(TokenKind::LeftBracket),
                ']' => self.make_token(TokenKind::RightBracket),
                ',' => self.make_token(TokenKind::Comma),
                '%' => self.make_token(TokenKind::Percent),
                ':' => {
                    if self.match_char(':') {
                        self.make_token(TokenKind::DoubleColon)
                    } else {
                        self.make_token(TokenKind::Colon)
                    }
                }
                '+' => self.make_token(TokenKind::Plus),
                '-' => self.make_token(TokenKind::Minus),
                '*' => {
                    if self.match_char('*') {
                        self.make_token(TokenKind::Power)
                    } else {
                        self.make_token(TokenKind::Star)
                    }
                }
                '/' => {
                    if self.match_char(')') {
                        self.make_token(TokenKind::RightArrayCtor)
                    } else if self.match_char('/') {
                        self.make_token(TokenKind::Concat)
                    } else if self.match_char('=') {
                        self.make_token(TokenKind::SlashEqual)
                    } else {
                        self.make_token(TokenKind::Slash)
                    }
                }
                '=' => {
                    if self.match_char('=') {
                        self.make_token(TokenKind::EqualEqual)
                    } else if self.match_char('>') {
                        self.make_token(TokenKind::Arrow)
                    } else {
                        self.make_token(TokenKind::Equal)
                    }
                }
                '<' => {
                    if self.match_char('=') {
                        self.make_token(TokenKind::LessEqual)
                    } else {
                        self.make_token(TokenKind::Less)
                    }
                }
                '>' => {
                    if self.match_char('=') {
                        self.make_token(TokenKind::GreaterEqual)
                    } else {
                        self.make_token(TokenKind::Greater)
                    }
                }
                '\'' | '"' => self.scan_string(c)?,
                '.' => {
                    if self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                        self.scan_number(true)?
                    } else {
                        self.scan_dot_word()?
                    }
                }
                c if c.is_ascii_digit() => self.scan_number(false)?,
                c if c.is_xid_start() => self.scan_identifier(),
                _ => {
                    return Err(self.make_error(
                        &format!("Unexpected character: '{}'", c),
                        LexerErrorKind::UnexpectedChar,
                    ))
                }
            };
            log::trace!("token {}", token);
            return Ok(token);
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.at_eof
    }

    /// Collect all tokens into a vector, always ending with
    /// `EndOfStatement` followed by `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            if token.is_eof() {
                if self.last_kind != TokenKind::EndOfStatement {
                    tokens.push(Token::new(
                        TokenKind::EndOfStatement,
                        token.span,
                        String::new(),
                    ));
                }
                tokens.push(token);
                break;
            }
            tokens.push(token);
        }
        Ok(tokens)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at_eof {
            None
        } else {
            let result = self.next_token();
            if result.as_ref().map(|t| t.is_eof()).unwrap_or(false) {
                self.at_eof = true;
            }
            Some(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source).tokenize().unwrap()
    }

    fn token_kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty() {
        let tokens = lex("");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_blank_lines_collapse() {
        let kinds = token_kinds("a\n\n\n  \nb");
        assert_eq!(kinds, vec![
            TokenKind::Identifier,
            TokenKind::EndOfStatement,
            TokenKind::Identifier,
            TokenKind::EndOfStatement,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn test_comments_and_preprocessor() {
        let tokens = lex("#include \"x.h\"\nfoo ! comment\nbar");
        assert_eq!(tokens[0].lexeme, "foo");
        assert_eq!(tokens[2].lexeme, "bar");
    }

    #[test]
    fn test_continuation_joins_statement() {
        let kinds = token_kinds("call invoke( &   ! trailing comment\n\n   & a, &\n  b)");
        assert_eq!(kinds, vec![
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::LeftParen,
            TokenKind::Identifier,
            TokenKind::Comma,
            TokenKind::Identifier,
            TokenKind::RightParen,
            TokenKind::EndOfStatement,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn test_numbers() {
        let tokens = lex("123 45.67 1e10 3.14e-2_r_def 1.0d0 2_i_def 1.");
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::Real);
        assert_eq!(tokens[2].kind, TokenKind::Real);
        assert_eq!(tokens[3].kind, TokenKind::Real);
        assert_eq!(tokens[3].lexeme, "3.14e-2_r_def");
        assert_eq!(tokens[4].kind, TokenKind::Real);
        assert_eq!(tokens[5].kind, TokenKind::Integer);
        assert_eq!(tokens[5].lexeme, "2_i_def");
        assert_eq!(tokens[6].kind, TokenKind::Real);
    }

    #[test]
    fn test_dotted_operators() {
        let tokens = lex("1.eq.2 .and. .TRUE.");
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::DotOperator);
        assert_eq!(tokens[2].kind, TokenKind::Integer);
        assert_eq!(tokens[3].kind, TokenKind::DotOperator);
        assert_eq!(tokens[4].kind, TokenKind::Logical);
    }

    #[test]
    fn test_array_constructor_delimiters() {
        let kinds = token_kinds("x = (/ a, b /)");
        assert!(kinds.contains(&TokenKind::LeftArrayCtor));
        assert!(kinds.contains(&TokenKind::RightArrayCtor));
        let kinds = token_kinds("y = a / b");
        assert!(kinds.contains(&TokenKind::Slash));
    }

    #[test]
    fn test_strings() {
        let tokens = lex("name = 'it''s' // \"q\"");
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].lexeme, "'it''s'");
        assert_eq!(tokens[3].kind, TokenKind::Concat);
        assert!(Lexer::new("'open").tokenize().is_err());
    }

    #[test]
    fn test_spans_are_exact() {
        let src = "  call invoke(f)\n";
        let tokens = lex(src);
        assert_eq!(&src[tokens[0].span.start_offset..tokens[0].span.end_offset], "call");
        assert_eq!(tokens[0].span.start_column, 3);
        assert_eq!(tokens[4].kind, TokenKind::RightParen);
        assert_eq!(tokens[4].span.end_offset, 16);
    }

    #[test]
    fn test_double_colon_and_arrow() {
        let kinds = token_kinds("procedure, nopass :: code => k_code");
        assert!(kinds.contains(&TokenKind::DoubleColon));
        assert!(kinds.contains(&TokenKind::Arrow));
    }
}
