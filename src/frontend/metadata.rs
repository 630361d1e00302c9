//! Kernel metadata parser.
//!
//! Reads a kernel module, finds every `type, extends(kernel_type)` block
//! and turns its `meta_args`, `operates_on`, `meta_funcs`, `gh_shape` and
//! procedure binding into a validated [`Kernel`]. The source of each code
//! subroutine is captured so kernels can later be inlined.

use crate::frontend::cursor::{span_of, split_top_level, TokenCursor};
use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::ir::kernel::*;
use crate::utils::errors::{MetadataError, ParseError, ParseErrorKind, PsyResult};
use crate::utils::location::Span;
use log::{debug, trace};
use std::collections::HashMap;

/// Parse every kernel type declared in `source`.
pub fn parse_kernel_module(source: &str) -> PsyResult<Vec<Kernel>> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = MetadataParser::new(source, tokens);
    parser.parse()
}

/// Metadata collected for one kernel type before validation.
#[derive(Debug, Default)]
struct PendingKernel {
    name: String,
    module: String,
    span: Span,
    dimension: Option<(usize, Span)>,
    args: Vec<(ArgumentDescriptor, Span)>,
    operates_on: Option<IterationSpace>,
    procedure: Option<String>,
    funcs: Option<(Vec<BasisRequest>, Span)>,
    shapes: Option<Vec<EvaluatorShape>>,
}

/// The pieces of `<type-spec>[, attrs] :: name[(n)] [= init]`.
struct Declaration<'t> {
    name: String,
    dimension: Option<usize>,
    init: &'t [Token],
}

/// A single entry inside `arg_type(...)` or `func_type(...)`.
enum Tag {
    Word(String),
    Stencil(String),
}

struct MetadataParser<'a> {
    source: &'a str,
    cursor: TokenCursor,
    module: String,
}

impl<'a> MetadataParser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            cursor: TokenCursor::new(tokens),
            module: String::new(),
        }
    }

    fn parse(&mut self) -> PsyResult<Vec<Kernel>> {
        let mut pending = Vec::new();
        let mut code: HashMap<String, String> = HashMap::new();

        while !self.cursor.is_at_end() {
            if self.cursor.match_token(TokenKind::EndOfStatement) {
                continue;
            }
            if self.cursor.check_word("module")
                && self.cursor.peek(1).kind == TokenKind::Identifier
                && !self.cursor.peek(1).is_word("procedure")
            {
                self.cursor.advance();
                self.module = self.cursor.consume_identifier("Expected module name")?;
                trace!("kernel module {}", self.module);
                self.cursor.skip_statement();
            } else if self.at_kernel_type() {
                pending.push(self.parse_kernel_type()?);
            } else if self.at_subroutine_start() {
                let (name, text) = self.capture_subroutine()?;
                code.insert(name, text);
            } else {
                self.cursor.skip_statement();
            }
        }

        pending
            .into_iter()
            .map(|p| finish_kernel(p, &code).map_err(Into::into))
            .collect()
    }

    /// `type, [attrs,] extends(kernel_type) :: name`
    fn at_kernel_type(&self) -> bool {
        if !self.cursor.check_word("type") || self.cursor.peek(1).kind != TokenKind::Comma {
            return false;
        }
        let mut n = 1;
        loop {
            let tok = self.cursor.peek(n);
            if matches!(tok.kind, TokenKind::EndOfStatement | TokenKind::Eof | TokenKind::DoubleColon) {
                return false;
            }
            if tok.is_word("extends") {
                return true;
            }
            n += 1;
        }
    }

    fn at_subroutine_start(&self) -> bool {
        let mut n = 0;
        while ["pure", "elemental", "recursive", "impure"]
            .iter()
            .any(|w| self.cursor.peek(n).is_word(w))
        {
            n += 1;
        }
        self.cursor.peek(n).is_word("subroutine")
    }

    fn at_subroutine_end(&self) -> bool {
        (self.cursor.check_word("end") && self.cursor.peek(1).is_word("subroutine"))
            || self.cursor.check_word("endsubroutine")
    }

    /// Tokens of the current statement; the terminator is consumed.
    fn statement_tokens(&mut self) -> Vec<Token> {
        let mut out = Vec::new();
        while !self.cursor.at_statement_end() {
            out.push(self.cursor.advance().clone());
        }
        self.cursor.match_token(TokenKind::EndOfStatement);
        out
    }

    fn capture_subroutine(&mut self) -> Result<(String, String), ParseError> {
        let first = self.cursor.current().span;
        let start = self.source[..first.start_offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        while !self.cursor.check_word("subroutine") {
            self.cursor.advance();
        }
        self.cursor.advance();
        let name = self.cursor.consume_identifier("Expected subroutine name")?;
        self.cursor.skip_statement();

        let mut depth = 1usize;
        while !self.cursor.is_at_end() {
            if self.at_subroutine_end() {
                let stmt = self.statement_tokens();
                depth -= 1;
                if depth == 0 {
                    let end = span_of(&stmt).end_offset;
                    trace!("captured code for {}", name);
                    return Ok((name, self.source[start..end].to_string()));
                }
            } else if self.at_subroutine_start() {
                depth += 1;
                self.cursor.skip_statement();
            } else {
                self.cursor.skip_statement();
            }
        }
        Err(ParseError::new(
            ParseErrorKind::UnexpectedEof,
            format!("Subroutine '{}' is never closed", name),
            first,
        ))
    }

    fn parse_kernel_type(&mut self) -> PsyResult<PendingKernel> {
        let header = self.statement_tokens();
        let colons = header
            .iter()
            .position(|t| t.kind == TokenKind::DoubleColon)
            .ok_or_else(|| ParseError::new(
                ParseErrorKind::ExpectedToken,
                "Expected '::' in kernel type declaration",
                span_of(&header),
            ))?;
        let name_tok = header
            .get(colons + 1)
            .filter(|t| t.kind == TokenKind::Identifier)
            .ok_or_else(|| ParseError::new(
                ParseErrorKind::ExpectedIdentifier,
                "Expected kernel type name",
                span_of(&header),
            ))?;

        let mut kernel = PendingKernel {
            name: name_tok.lower(),
            module: self.module.clone(),
            span: span_of(&header),
            ..Default::default()
        };
        debug!("parsing metadata of {}", kernel.name);

        loop {
            if self.cursor.is_at_end() {
                return Err(ParseError::new(
                    ParseErrorKind::UnexpectedEof,
                    format!("Kernel type '{}' is never closed", kernel.name),
                    kernel.span,
                )
                .into());
            }
            if (self.cursor.check_word("end") && self.cursor.peek(1).is_word("type"))
                || self.cursor.check_word("endtype")
            {
                self.cursor.skip_statement();
                break;
            }
            let stmt = self.statement_tokens();
            let Some(first) = stmt.first() else { continue };

            if first.is_word("type") && stmt.get(1).map(|t| t.kind) == Some(TokenKind::LeftParen) {
                let Some(type_name) = stmt.get(2).map(|t| t.lower()) else { continue };
                let Some(decl) = split_declaration(&stmt) else { continue };
                match (type_name.as_str(), decl.name.as_str()) {
                    ("arg_type", "meta_args") => {
                        if let Some(n) = decl.dimension {
                            kernel.dimension = Some((n, span_of(&stmt)));
                        }
                        for (i, entry) in array_items(decl.init).into_iter().enumerate() {
                            let desc = parse_arg_entry(&kernel.name, i + 1, entry)?;
                            kernel.args.push((desc, span_of(entry)));
                        }
                    }
                    ("func_type", "meta_funcs") => {
                        let mut funcs = Vec::new();
                        for (i, entry) in array_items(decl.init).into_iter().enumerate() {
                            funcs.push(parse_func_entry(&kernel.name, i + 1, entry)?);
                        }
                        kernel.funcs = Some((funcs, span_of(&stmt)));
                    }
                    _ => {}
                }
            } else if first.is_word("integer") {
                let Some(decl) = split_declaration(&stmt) else { continue };
                match decl.name.as_str() {
                    "operates_on" => {
                        let tag = single_word(decl.init).ok_or_else(|| {
                            MetadataError::new(&kernel.name, "operates_on must be a single tag")
                                .with_span(span_of(&stmt))
                        })?;
                        let space = IterationSpace::from_tag(&tag).ok_or_else(|| {
                            MetadataError::new(
                                &kernel.name,
                                format!("unknown operates_on value '{}'", tag),
                            )
                            .with_span(span_of(&stmt))
                        })?;
                        kernel.operates_on = Some(space);
                    }
                    "gh_shape" => {
                        let mut shapes = Vec::new();
                        let items: Vec<&[Token]> = if is_array_ctor(decl.init) {
                            array_items(decl.init)
                        } else {
                            vec![decl.init]
                        };
                        for item in items {
                            let shape = single_word(item)
                                .and_then(|w| EvaluatorShape::from_tag(&w))
                                .ok_or_else(|| {
                                    MetadataError::new(
                                        &kernel.name,
                                        format!(
                                            "gh_shape must be GH_QUADRATURE_XYOZ or GH_EVALUATOR, found '{}'",
                                            text_of(item)
                                        ),
                                    )
                                    .with_span(span_of(&stmt))
                                })?;
                            shapes.push(shape);
                        }
                        kernel.shapes = Some(shapes);
                    }
                    _ => {}
                }
            } else if first.is_word("procedure") {
                // `procedure, nopass :: name` or `:: code => name`
                if let Some(name) = stmt
                    .iter()
                    .rev()
                    .find(|t| t.kind == TokenKind::Identifier)
                    .filter(|_| stmt.iter().any(|t| t.kind == TokenKind::DoubleColon))
                {
                    kernel.procedure = Some(name.lower());
                }
            }
        }
        Ok(kernel)
    }
}

fn text_of(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.lexeme.as_str()).collect::<Vec<_>>().join("")
}

fn single_word(tokens: &[Token]) -> Option<String> {
    match tokens {
        [t] if t.kind == TokenKind::Identifier => Some(t.lower()),
        _ => None,
    }
}

fn is_array_ctor(tokens: &[Token]) -> bool {
    matches!(
        (tokens.first().map(|t| t.kind), tokens.last().map(|t| t.kind)),
        (Some(TokenKind::LeftArrayCtor), Some(TokenKind::RightArrayCtor))
            | (Some(TokenKind::LeftBracket), Some(TokenKind::RightBracket))
    )
}

/// Items of `(/ a, b /)` or `[a, b]`; a lone value is one item.
fn array_items(tokens: &[Token]) -> Vec<&[Token]> {
    if is_array_ctor(tokens) {
        split_top_level(&tokens[1..tokens.len() - 1])
    } else if tokens.is_empty() {
        Vec::new()
    } else {
        vec![tokens]
    }
}

fn parse_dimension(tokens: &[Token]) -> Option<usize> {
    match tokens {
        [t] if t.kind == TokenKind::Integer => t.lexeme.split('_').next()?.parse().ok(),
        _ => None,
    }
}

fn split_declaration(stmt: &[Token]) -> Option<Declaration<'_>> {
    let colons = stmt.iter().position(|t| t.kind == TokenKind::DoubleColon)?;
    let (spec, rest) = (&stmt[..colons], &stmt[colons + 1..]);

    let mut dimension = None;
    if let Some(i) = spec.iter().position(|t| t.is_word("dimension")) {
        let close = spec[i..].iter().position(|t| t.kind == TokenKind::RightParen)? + i;
        dimension = parse_dimension(spec.get(i + 2..close)?);
    }

    let name_tok = rest.first().filter(|t| t.kind == TokenKind::Identifier)?;
    let mut idx = 1;
    if rest.get(1).map(|t| t.kind) == Some(TokenKind::LeftParen) {
        let close = rest.iter().position(|t| t.kind == TokenKind::RightParen)?;
        dimension = dimension.or_else(|| parse_dimension(&rest[2..close]));
        idx = close + 1;
    }
    let init = match rest.get(idx) {
        Some(t) if t.kind == TokenKind::Equal => &rest[idx + 1..],
        _ => &rest[rest.len()..],
    };
    Some(Declaration { name: name_tok.lower(), dimension, init })
}

fn parse_tag(tokens: &[Token]) -> Option<Tag> {
    match tokens {
        [t] if t.kind == TokenKind::Identifier => Some(Tag::Word(t.lower())),
        [s, open, shape, close]
            if s.is_word("stencil")
                && open.kind == TokenKind::LeftParen
                && shape.kind == TokenKind::Identifier
                && close.kind == TokenKind::RightParen =>
        {
            Some(Tag::Stencil(shape.lower()))
        }
        _ => None,
    }
}

/// Entries of `<name>( ... )`.
fn constructor_entries<'t>(
    kernel: &str,
    position: usize,
    ctor: &str,
    tokens: &'t [Token],
) -> Result<Vec<&'t [Token]>, MetadataError> {
    let bad = || {
        MetadataError::new(kernel, format!("expected a {}(...) entry, found '{}'", ctor, text_of(tokens)))
            .at_argument(position)
            .with_span(span_of(tokens))
    };
    match tokens {
        [name, open, .., close]
            if name.is_word(ctor)
                && open.kind == TokenKind::LeftParen
                && close.kind == TokenKind::RightParen =>
        {
            Ok(split_top_level(&tokens[2..tokens.len() - 1]))
        }
        _ => Err(bad()),
    }
}

fn parse_arg_entry(kernel: &str, position: usize, tokens: &[Token]) -> Result<ArgumentDescriptor, MetadataError> {
    let span = span_of(tokens);
    let err = |msg: String| MetadataError::new(kernel, msg).at_argument(position).with_span(span);

    let mut words = Vec::new();
    let mut stencil = None;
    for (i, entry) in constructor_entries(kernel, position, "arg_type", tokens)?.into_iter().enumerate() {
        match parse_tag(entry) {
            Some(Tag::Word(w)) => words.push(w),
            Some(Tag::Stencil(s)) if i == 4 => {
                stencil = Some(StencilShape::from_tag(&s).ok_or_else(|| err(format!("unknown stencil shape '{}'", s)))?);
            }
            _ => return Err(err(format!("unrecognised arg_type entry '{}'", text_of(entry)))),
        }
    }
    if words.len() < 3 {
        return Err(err(format!("arg_type needs at least 3 entries, found {}", words.len())));
    }

    let kind = ArgumentKind::from_tag(&words[0])
        .ok_or_else(|| err(format!("unknown argument type '{}'", words[0])))?;
    let data_type = DataType::from_tag(&words[1])
        .ok_or_else(|| err(format!("unknown data type '{}'", words[1])))?;
    let access = AccessMode::from_tag(&words[2])
        .ok_or_else(|| err(format!("unknown access '{}'", words[2])))?;
    let space = |i: usize| -> Result<FunctionSpace, MetadataError> {
        FunctionSpace::from_tag(&words[i]).ok_or_else(|| err(format!("unknown function space '{}'", words[i])))
    };

    let entries = words.len() + usize::from(stencil.is_some());
    let desc = match kind {
        ArgumentKind::Scalar => {
            if entries != 3 {
                return Err(err(format!("a scalar takes 3 arg_type entries, found {}", entries)));
            }
            ArgumentDescriptor::scalar(data_type, access)
        }
        ArgumentKind::Field => {
            if words.len() != 4 {
                return Err(err(format!(
                    "a field takes 4 arg_type entries plus an optional stencil, found {}",
                    entries
                )));
            }
            let mut d = ArgumentDescriptor::field(data_type, access, space(3)?);
            d.stencil = stencil;
            d
        }
        ArgumentKind::Operator => {
            if words.len() != 5 || stencil.is_some() {
                return Err(err(format!("an operator takes 5 arg_type entries, found {}", entries)));
            }
            if data_type != DataType::Real {
                return Err(err("operators must be GH_REAL".to_string()));
            }
            ArgumentDescriptor::operator(access, space(3)?, space(4)?)
        }
    };
    Ok(desc)
}

fn parse_func_entry(kernel: &str, position: usize, tokens: &[Token]) -> Result<BasisRequest, MetadataError> {
    let span = span_of(tokens);
    let err = |msg: String| MetadataError::new(kernel, msg).with_span(span);
    let entries = constructor_entries(kernel, position, "func_type", tokens)?;
    let words: Vec<String> = entries
        .iter()
        .map(|e| single_word(e).ok_or_else(|| err(format!("unrecognised func_type entry '{}'", text_of(e)))))
        .collect::<Result<_, _>>()?;
    if !(2..=3).contains(&words.len()) {
        return Err(err(format!("func_type takes 2 or 3 entries, found {}", words.len())));
    }
    let space = FunctionSpace::from_tag(&words[0])
        .ok_or_else(|| err(format!("unknown function space '{}'", words[0])))?;
    let mut req = BasisRequest { space, basis: false, diff_basis: false };
    for w in &words[1..] {
        match w.as_str() {
            "gh_basis" => req.basis = true,
            "gh_diff_basis" => req.diff_basis = true,
            other => return Err(err(format!("unknown basis function '{}'", other))),
        }
    }
    Ok(req)
}

/// Apply the consistency rules and classify the kernel.
fn finish_kernel(p: PendingKernel, code: &HashMap<String, String>) -> Result<Kernel, MetadataError> {
    let name = p.name.as_str();
    let fail = |msg: String| MetadataError::new(name, msg).with_span(p.span);

    if let Some((n, span)) = p.dimension {
        if n != p.args.len() {
            return Err(MetadataError::new(
                name,
                format!("meta_args has dimension {} but {} arg_type entries", n, p.args.len()),
            )
            .with_span(span));
        }
    }
    if p.args.is_empty() {
        return Err(fail("kernel declares no meta_args".to_string()));
    }
    let space = p.operates_on.ok_or_else(|| fail("missing mandatory 'operates_on'".to_string()))?;
    let procedure = p.procedure.clone().ok_or_else(|| fail("missing procedure binding".to_string()))?;

    for (i, (arg, span)) in p.args.iter().enumerate() {
        let arg_err = |msg: String| MetadataError::new(name, msg).at_argument(i + 1).with_span(*span);
        match (arg.kind, arg.access) {
            (ArgumentKind::Scalar, AccessMode::Read) => {}
            (ArgumentKind::Scalar, AccessMode::Sum) => {
                if arg.data_type == DataType::Logical {
                    return Err(arg_err("a GH_SUM reduction must be GH_REAL or GH_INTEGER".into()));
                }
            }
            (ArgumentKind::Scalar, access) => {
                return Err(arg_err(format!("scalars must be GH_READ or GH_SUM, not {}", access.tag())));
            }
            (_, AccessMode::Sum) => {
                return Err(arg_err("GH_SUM is only valid for scalar reductions".into()));
            }
            (ArgumentKind::Operator, AccessMode::Inc) => {
                return Err(arg_err("operators cannot be GH_INC".into()));
            }
            (ArgumentKind::Field, AccessMode::Inc) => {
                if space == IterationSpace::Dof {
                    return Err(arg_err("GH_INC is not valid in a DOF kernel".into()));
                }
                if let Some(sp) = arg.space.filter(|s| !s.is_continuous()) {
                    return Err(arg_err(format!("GH_INC is invalid on discontinuous space {}", sp)));
                }
            }
            (ArgumentKind::Field, AccessMode::ReadWrite) => {
                if let Some(sp) = arg.space.filter(|s| s.is_continuous() && space.is_cell_column()) {
                    return Err(arg_err(format!(
                        "GH_READWRITE is invalid on continuous space {} in a cell-column kernel",
                        sp
                    )));
                }
            }
            _ => {}
        }
        if arg.stencil.is_some() {
            if arg.access != AccessMode::Read {
                return Err(arg_err("stencils are only permitted on GH_READ fields".into()));
            }
            if !space.is_cell_column() {
                return Err(arg_err(format!("stencils are not permitted when operating on {}", space)));
            }
        }
        if arg.is_operator() && matches!(space, IterationSpace::Dof | IterationSpace::Domain) {
            return Err(arg_err(format!("operators are not permitted when operating on {}", space)));
        }
    }

    if !p.args.iter().any(|(a, _)| a.access.writes()) {
        return Err(fail("kernel must write to at least one argument".to_string()));
    }

    let signature = KernelSignature {
        name: p.name.clone(),
        module: p.module.clone(),
        code_source: code.get(&procedure).cloned(),
        procedure,
        args: p.args.into_iter().map(|(a, _)| a).collect(),
        iteration_space: space,
    };

    let kernel = match (p.funcs, p.shapes) {
        (Some(_), None) => return Err(fail("meta_funcs requires gh_shape".to_string())),
        (funcs, Some(shapes)) => {
            let funcs = funcs.map(|(f, _)| f).unwrap_or_default();
            let used = signature.unique_spaces();
            if let Some(f) = funcs.iter().find(|f| !used.contains(&f.space)) {
                return Err(fail(format!("meta_funcs names space {} which no argument uses", f.space)));
            }
            Kernel::Evaluator { signature, shapes, funcs }
        }
        (None, None) if signature.args.iter().any(|a| a.is_operator()) => Kernel::Operator(signature),
        (None, None) => Kernel::Standard(signature),
    };
    debug!("kernel {} is {} over {}", kernel.name(), kernel.variant_name(), space);
    Ok(kernel)
}
