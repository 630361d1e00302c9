//! Algorithm-layer parser.
//!
//! Finds `call invoke(...)` statements in host source, records where
//! they are and which program unit encloses them, and resolves each
//! kernel reference against the kernel registry.

use crate::frontend::cursor::{span_of, split_top_level, TokenCursor};
use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::ir::invoke::{ActualArg, InvokeCall, KernelInvocation};
use crate::ir::kernel::{AccessMode, KernelRegistry};
use crate::utils::errors::*;
use crate::utils::location::{SourceMap, Span};
use log::{debug, trace};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Program,
    Module,
    Subroutine,
    Function,
}

/// A program unit that may receive a generated `use` statement.
#[derive(Debug, Clone)]
pub struct ProgramUnit {
    pub kind: UnitKind,
    pub name: String,
    /// Byte offset of the line following the unit header
    pub insert_at: usize,
    /// Indentation for statements inserted at `insert_at`
    pub indent: String,
}

/// `use <module>[, only: names]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseStatement {
    pub module: String,
    pub only: Vec<String>,
}

/// A kernel reference inside an invoke, before resolution.
#[derive(Debug, Clone)]
pub struct ParsedCall {
    pub kernel: String,
    pub args: Vec<ActualArg>,
    pub span: Span,
}

/// One `call invoke(...)` statement, before resolution.
#[derive(Debug, Clone)]
pub struct InvokeSite {
    pub label: Option<String>,
    pub calls: Vec<ParsedCall>,
    pub span: Span,
    pub unit: usize,
}

/// A parsed algorithm-layer file.
#[derive(Debug, Clone)]
pub struct AlgorithmFile {
    pub source: SourceMap,
    pub units: Vec<ProgramUnit>,
    pub uses: Vec<UseStatement>,
    pub invokes: Vec<InvokeSite>,
}

impl AlgorithmFile {
    /// Kernel type names referenced by any invoke, in first-use order.
    pub fn kernel_names(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for call in self.invokes.iter().flat_map(|i| &i.calls) {
            if !seen.contains(&call.kernel) {
                seen.push(call.kernel.clone());
            }
        }
        seen
    }

    /// Module named in a `use ..., only:` list that provides `name`.
    pub fn module_providing(&self, name: &str) -> Option<&str> {
        self.uses
            .iter()
            .find(|u| u.only.iter().any(|n| n == name))
            .map(|u| u.module.as_str())
    }
}

/// Parse host source text.
pub fn parse_algorithm(source: &str) -> PsyResult<AlgorithmFile> {
    let tokens = Lexer::new(source).tokenize()?;
    let map = SourceMap::new(source.to_string());
    let mut parser = AlgorithmParser {
        cursor: TokenCursor::new(tokens),
        map: &map,
        units: Vec::new(),
        stack: Vec::new(),
        uses: Vec::new(),
        invokes: Vec::new(),
    };
    parser.parse()?;
    let AlgorithmParser { units, uses, invokes, .. } = parser;
    debug!("algorithm layer: {} unit(s), {} invoke(s)", units.len(), invokes.len());
    Ok(AlgorithmFile { source: map, units, uses, invokes })
}

struct AlgorithmParser<'m> {
    cursor: TokenCursor,
    map: &'m SourceMap,
    units: Vec<ProgramUnit>,
    /// Indices of the currently open units
    stack: Vec<usize>,
    uses: Vec<UseStatement>,
    invokes: Vec<InvokeSite>,
}

impl<'m> AlgorithmParser<'m> {
    fn parse(&mut self) -> Result<(), ParseError> {
        while !self.cursor.is_at_end() {
            if self.cursor.match_token(TokenKind::EndOfStatement) {
                continue;
            }
            if let Some(kind) = self.unit_start() {
                self.parse_unit_header(kind)?;
            } else if self.at_unit_end() {
                self.stack.pop();
                self.cursor.skip_statement();
            } else if self.cursor.check_word("use") {
                self.parse_use()?;
            } else if self.cursor.check_word("call") && self.cursor.peek(1).is_word("invoke") {
                self.parse_invoke()?;
            } else {
                self.cursor.skip_statement();
            }
        }
        Ok(())
    }

    /// Recognise `program`, `module`, `[prefix] subroutine` and
    /// `[prefix] [type] function` headers.
    fn unit_start(&self) -> Option<UnitKind> {
        let c = &self.cursor;
        if c.check_word("program") {
            return Some(UnitKind::Program);
        }
        if c.check_word("module") && c.peek(1).kind == TokenKind::Identifier && !c.peek(1).is_word("procedure") {
            return Some(UnitKind::Module);
        }
        let mut n = 0;
        loop {
            let tok = c.peek(n);
            if tok.is_word("subroutine") {
                return Some(UnitKind::Subroutine);
            }
            if tok.is_word("function") {
                return Some(UnitKind::Function);
            }
            let prefix = ["pure", "elemental", "recursive", "impure", "integer", "real", "logical", "character", "complex"]
                .iter()
                .any(|w| tok.is_word(w));
            if prefix {
                n += 1;
                // Kind selector on a type prefix: `real(kind=r_def) function`
                if c.peek(n).kind == TokenKind::LeftParen {
                    while !matches!(c.peek(n).kind, TokenKind::RightParen | TokenKind::EndOfStatement | TokenKind::Eof) {
                        n += 1;
                    }
                    n += 1;
                }
            } else {
                return None;
            }
        }
    }

    fn at_unit_end(&self) -> bool {
        let c = &self.cursor;
        if c.check_word("end") {
            let next = c.peek(1);
            return matches!(next.kind, TokenKind::EndOfStatement | TokenKind::Eof)
                || ["program", "module", "subroutine", "function"].iter().any(|w| next.is_word(w));
        }
        ["endprogram", "endmodule", "endsubroutine", "endfunction"]
            .iter()
            .any(|w| c.check_word(w))
    }

    fn parse_unit_header(&mut self, kind: UnitKind) -> Result<(), ParseError> {
        let keyword = match kind {
            UnitKind::Program => "program",
            UnitKind::Module => "module",
            UnitKind::Subroutine => "subroutine",
            UnitKind::Function => "function",
        };
        let first = self.cursor.current().span;
        while !self.cursor.check_word(keyword) {
            self.cursor.advance();
        }
        self.cursor.advance();
        let name = self.cursor.consume_identifier(&format!("Expected {} name", keyword))?;
        while !self.cursor.at_statement_end() {
            self.cursor.advance();
        }
        let header_end = self.cursor.previous().span.end_offset;
        self.cursor.match_token(TokenKind::EndOfStatement);

        let indent = format!("{}  ", self.map.indentation_at(first.start_offset));
        trace!("{:?} {} opens", kind, name);
        self.units.push(ProgramUnit {
            kind,
            name,
            insert_at: self.map.next_line_start(header_end),
            indent,
        });
        self.stack.push(self.units.len() - 1);
        Ok(())
    }

    fn parse_use(&mut self) -> Result<(), ParseError> {
        self.cursor.advance();
        // `use, intrinsic :: iso_c_binding`
        if self.cursor.match_token(TokenKind::Comma) {
            self.cursor.advance();
        }
        self.cursor.match_token(TokenKind::DoubleColon);
        let module = self.cursor.consume_identifier("Expected module name after 'use'")?;
        let mut only = Vec::new();
        if self.cursor.match_token(TokenKind::Comma) && self.cursor.match_word("only") {
            self.cursor.consume(TokenKind::Colon, "Expected ':' after 'only'")?;
            while !self.cursor.at_statement_end() {
                let tok = self.cursor.advance().clone();
                if tok.kind == TokenKind::Identifier {
                    // `local => remote` keeps the local name
                    if self.cursor.match_token(TokenKind::Arrow) {
                        self.cursor.advance();
                    }
                    only.push(tok.lower());
                }
            }
        }
        self.cursor.skip_statement();
        self.uses.push(UseStatement { module, only });
        Ok(())
    }

    fn parse_invoke(&mut self) -> Result<(), ParseError> {
        let start = self.cursor.advance().span;
        self.cursor.advance();
        let open = self.cursor.consume(TokenKind::LeftParen, "Expected '(' after 'invoke'")?.span;
        let inner = self.cursor.collect_balanced(open)?;
        let span = start.merge(&self.cursor.previous().span);
        self.cursor.end_statement()?;

        let unit = self.stack.last().copied().ok_or_else(|| {
            ParseError::new(ParseErrorKind::Unsupported, "invoke outside of any program unit", span)
        })?;

        let mut label = None;
        let mut calls = Vec::new();
        for item in split_top_level(&inner) {
            match item {
                [] => {
                    return Err(ParseError::new(ParseErrorKind::UnexpectedToken, "Empty invoke item", span));
                }
                [key, eq, value] if key.is_word("name") && eq.kind == TokenKind::Equal => {
                    label = Some(parse_label(value)?);
                }
                [name, open, .., close]
                    if name.kind == TokenKind::Identifier
                        && open.kind == TokenKind::LeftParen
                        && close.kind == TokenKind::RightParen =>
                {
                    let args = split_top_level(&item[2..item.len() - 1])
                        .into_iter()
                        .map(classify_actual)
                        .collect::<Result<Vec<_>, _>>()?;
                    calls.push(ParsedCall { kernel: name.lower(), args, span: span_of(item) });
                }
                _ => {
                    return Err(ParseError::new(
                        ParseErrorKind::UnexpectedToken,
                        "Expected 'kernel_type(args)' or 'name=\"label\"' in invoke",
                        span_of(item),
                    )
                    .with_found(tokens_text(item)));
                }
            }
        }
        if calls.is_empty() {
            return Err(ParseError::new(ParseErrorKind::UnexpectedToken, "invoke contains no kernel calls", span));
        }
        trace!("invoke at {} with {} call(s)", span, calls.len());
        self.invokes.push(InvokeSite { label, calls, span, unit });
        Ok(())
    }
}

fn parse_label(tok: &Token) -> Result<String, ParseError> {
    let invalid = || {
        ParseError::new(ParseErrorKind::UnexpectedToken, "invoke name must be a quoted Fortran name", tok.span)
            .with_found(tok.lexeme.clone())
    };
    if tok.kind != TokenKind::String || tok.lexeme.len() < 2 {
        return Err(invalid());
    }
    let label = tok.lexeme[1..tok.lexeme.len() - 1].trim().to_ascii_lowercase();
    let valid = label.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(label)
    } else {
        Err(invalid())
    }
}

/// Source-like text of a token run.
pub fn tokens_text(tokens: &[Token]) -> String {
    let wordy = |k: TokenKind| {
        matches!(k, TokenKind::Identifier | TokenKind::Integer | TokenKind::Real | TokenKind::Logical)
    };
    let mut out = String::new();
    let mut prev: Option<TokenKind> = None;
    for tok in tokens {
        if let Some(p) = prev {
            if wordy(p) && wordy(tok.kind) {
                out.push(' ');
            }
        }
        out.push_str(&tok.lexeme);
        prev = Some(tok.kind);
    }
    out
}

fn classify_actual(tokens: &[Token]) -> Result<ActualArg, ParseError> {
    if tokens.is_empty() {
        return Err(ParseError::new(ParseErrorKind::UnexpectedToken, "Empty actual argument", Span::dummy()));
    }
    let text = tokens_text(tokens);
    let is_literal = match tokens {
        [t] => t.kind.is_literal(),
        [sign, t] => matches!(sign.kind, TokenKind::Plus | TokenKind::Minus)
            && matches!(t.kind, TokenKind::Integer | TokenKind::Real),
        _ => false,
    };
    if is_literal {
        return Ok(ActualArg::Literal(text));
    }
    if is_variable_ref(tokens) {
        Ok(ActualArg::Variable(text))
    } else {
        Ok(ActualArg::Expression(text))
    }
}

/// `name ( % name | (subscripts) )*`
fn is_variable_ref(tokens: &[Token]) -> bool {
    let mut i = 0;
    if tokens.first().map(|t| t.kind) != Some(TokenKind::Identifier) {
        return false;
    }
    i += 1;
    while i < tokens.len() {
        match tokens[i].kind {
            TokenKind::Percent => {
                if tokens.get(i + 1).map(|t| t.kind) != Some(TokenKind::Identifier) {
                    return false;
                }
                i += 2;
            }
            TokenKind::LeftParen => {
                let mut depth = 0usize;
                loop {
                    match tokens.get(i).map(|t| t.kind) {
                        None => return false,
                        Some(k) if k.opens() => depth += 1,
                        Some(k) if k.closes() => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                i += 1;
            }
            _ => return false,
        }
    }
    true
}

fn invoke_name(site: &InvokeSite, index: usize) -> String {
    match (&site.label, site.calls.as_slice()) {
        (Some(label), _) => format!("invoke_{}", label),
        (None, [single]) => format!("invoke_{}_{}", index, single.kernel),
        (None, _) => format!("invoke_{}", index),
    }
}

/// Resolve every invoke against `registry` and check the actual arguments.
pub fn resolve_invokes(file: &AlgorithmFile, registry: &KernelRegistry) -> PsyResult<Vec<InvokeCall>> {
    let mut labels = HashSet::new();
    let mut out = Vec::new();

    for (index, site) in file.invokes.iter().enumerate() {
        if let Some(label) = &site.label {
            if !labels.insert(label.clone()) {
                return Err(ParseError::new(
                    ParseErrorKind::DuplicateInvokeName,
                    format!("invoke name '{}' is used more than once", label),
                    site.span,
                )
                .into());
            }
        }
        let name = invoke_name(site, index);

        let mut calls = Vec::new();
        for call in &site.calls {
            let kernel = registry.get(&call.kernel).ok_or_else(|| UnresolvedKernelError {
                kernel: call.kernel.clone(),
                invoke: name.clone(),
                suggestion: registry.suggest(&call.kernel),
                span: call.span,
            })?;

            let expected = kernel.expected_actual_count();
            if call.args.len() != expected {
                return Err(ArgumentMismatchError {
                    kernel: call.kernel.clone(),
                    invoke: name.clone(),
                    reason: MismatchReason::Count { expected, found: call.args.len() },
                    span: call.span,
                }
                .into());
            }
            for (i, (desc, actual)) in kernel.signature().args.iter().zip(&call.args).enumerate() {
                let needs_variable = !desc.is_scalar() || desc.access == AccessMode::Sum;
                if needs_variable && !actual.is_variable() {
                    return Err(ArgumentMismatchError {
                        kernel: call.kernel.clone(),
                        invoke: name.clone(),
                        reason: MismatchReason::NotAVariable {
                            position: i + 1,
                            text: actual.text().to_string(),
                        },
                        span: call.span,
                    }
                    .into());
                }
            }
            calls.push(KernelInvocation::bind(kernel, call.args.clone(), call.span));
        }

        debug!("resolved {} ({} call(s))", name, calls.len());
        out.push(InvokeCall {
            name,
            label: site.label.clone(),
            index,
            calls,
            span: site.span,
            unit: site.unit,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::metadata::parse_kernel_module;

    const KERNEL: &str = r#"
module testkern_mod
  type, extends(kernel_type) :: testkern_type
    type(arg_type), dimension(3) :: meta_args = (/ &
         arg_type(GH_SCALAR, GH_REAL, GH_READ),    &
         arg_type(GH_FIELD,  GH_REAL, GH_INC, W1), &
         arg_type(GH_FIELD,  GH_REAL, GH_READ, W3) /)
    integer :: operates_on = CELL_COLUMN
  contains
    procedure, nopass :: testkern_code
  end type
end module testkern_mod
"#;

    const ALG: &str = r#"program single_invoke
  use constants_mod, only: r_def
  use testkern_mod, only: testkern_type
  implicit none
  type(field_type) :: f1, f2
  real(r_def) :: a
  call invoke(testkern_type(a, f1, f2))
  call invoke(name="second", testkern_type(0.5_r_def, f1, state%f2), &
              setval_c(f1, 0.0_r_def))
end program single_invoke
"#;

    fn registry() -> KernelRegistry {
        let mut reg = KernelRegistry::new();
        reg.extend(parse_kernel_module(KERNEL).unwrap());
        reg
    }

    #[test]
    fn test_parse_algorithm_structure() {
        let file = parse_algorithm(ALG).unwrap();
        assert_eq!(file.units.len(), 1);
        assert_eq!(file.units[0].kind, UnitKind::Program);
        assert_eq!(file.units[0].indent, "  ");
        assert!(ALG[file.units[0].insert_at..].starts_with("  use constants_mod"));
        assert_eq!(file.module_providing("testkern_type"), Some("testkern_mod"));
        assert_eq!(file.invokes.len(), 2);
        assert_eq!(file.invokes[1].label.as_deref(), Some("second"));
        let text = file.source.span_text(&file.invokes[0].span);
        assert_eq!(text, "call invoke(testkern_type(a, f1, f2))");
        let text = file.source.span_text(&file.invokes[1].span);
        assert!(text.ends_with("setval_c(f1, 0.0_r_def))"));
        assert_eq!(file.kernel_names(), vec!["testkern_type", "setval_c"]);
    }

    #[test]
    fn test_actual_classification() {
        let file = parse_algorithm(ALG).unwrap();
        let args = &file.invokes[1].calls[0].args;
        assert_eq!(args[0], ActualArg::Literal("0.5_r_def".into()));
        assert_eq!(args[2], ActualArg::Variable("state%f2".into()));
        let file = parse_algorithm("program p\ncall invoke(k_type(a*2.0, f(1), -1))\nend program\n").unwrap();
        let args = &file.invokes[0].calls[0].args;
        assert!(matches!(args[0], ActualArg::Expression(_)));
        assert_eq!(args[1], ActualArg::Variable("f(1)".into()));
        assert!(args[2].is_literal());
    }

    #[test]
    fn test_resolve_names() {
        let file = parse_algorithm(ALG).unwrap();
        let invokes = resolve_invokes(&file, &registry()).unwrap();
        assert_eq!(invokes[0].name, "invoke_0_testkern_type");
        assert_eq!(invokes[1].name, "invoke_second");
        assert!(invokes[1].calls[1].kernel.is_builtin());
    }

    #[test]
    fn test_unnamed_multi_kernel_invoke() {
        let src = "program p\ncall invoke(testkern_type(a, f1, f2), testkern_type(a, f1, f2))\nend program\n";
        let invokes = resolve_invokes(&parse_algorithm(src).unwrap(), &registry()).unwrap();
        assert_eq!(invokes[0].name, "invoke_0");
    }

    #[test]
    fn test_argument_count_mismatch() {
        let src = "program p\ncall invoke(testkern_type(a, f1))\nend program\n";
        let err = resolve_invokes(&parse_algorithm(src).unwrap(), &registry()).unwrap_err();
        match err {
            PsyError::ArgumentMismatch(e) => {
                assert_eq!(e.reason, MismatchReason::Count { expected: 3, found: 2 });
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_field_must_be_variable() {
        let src = "program p\ncall invoke(testkern_type(a, 1.0, f2))\nend program\n";
        let err = resolve_invokes(&parse_algorithm(src).unwrap(), &registry()).unwrap_err();
        assert!(matches!(
            err,
            PsyError::ArgumentMismatch(ArgumentMismatchError {
                reason: MismatchReason::NotAVariable { position: 2, .. },
                ..
            })
        ));
    }

    #[test]
    fn test_unresolved_with_suggestion() {
        let src = "program p\ncall invoke(testkern_typ(a, f1, f2))\nend program\n";
        let err = resolve_invokes(&parse_algorithm(src).unwrap(), &registry()).unwrap_err();
        match err {
            PsyError::UnresolvedKernel(e) => {
                assert_eq!(e.suggestion.as_deref(), Some("testkern_type"));
                assert_eq!(e.invoke, "invoke_0_testkern_typ");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_labels() {
        let src = "program p\ncall invoke(name=\"x\", setval_c(f, 0.0))\ncall invoke(name='X', setval_c(f, 1.0))\nend program\n";
        let err = resolve_invokes(&parse_algorithm(src).unwrap(), &registry()).unwrap_err();
        assert!(matches!(err, PsyError::Parse(ParseError { kind: ParseErrorKind::DuplicateInvokeName, .. })));
    }

    #[test]
    fn test_innermost_unit_and_subroutine_header() {
        let src = "module alg_mod\ncontains\n  subroutine run(f, &\n      g)\n    call invoke(setval_c(f, 0.0))\n  end subroutine run\nend module alg_mod\n";
        let file = parse_algorithm(src).unwrap();
        assert_eq!(file.units.len(), 2);
        assert_eq!(file.invokes[0].unit, 1);
        assert_eq!(file.units[1].indent, "    ");
        assert!(src[file.units[1].insert_at..].starts_with("    call invoke"));
    }
}
