//! Error types for the transformation engine.
//!
//! This module defines all error types used throughout the crate,
//! organized by the phase that produces them. Every error is fatal to
//! the current run: nothing is emitted once one of these is raised.

use thiserror::Error;
use crate::utils::location::Span;
use std::fmt;

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum PsyError {
    /// Error during lexing/tokenization
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    /// Error during parsing
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Malformed or inconsistent kernel metadata
    #[error("MetadataError: {0}")]
    Metadata(#[from] MetadataError),

    /// An invoke references a kernel with no known signature
    #[error("UnresolvedKernelError: {0}")]
    UnresolvedKernel(#[from] UnresolvedKernelError),

    /// Actual arguments do not match the declared ones
    #[error("ArgumentMismatchError: {0}")]
    ArgumentMismatch(#[from] ArgumentMismatchError),

    /// A transformation cannot be applied to the requested node
    #[error("InapplicableTransformationError: {0}")]
    InapplicableTransformation(#[from] InapplicableTransformationError),

    /// The node has already received this transformation
    #[error("AlreadyTransformedError: {0}")]
    AlreadyTransformed(#[from] AlreadyTransformedError),

    /// The IR cannot be expressed in the output dialect
    #[error("CodeGenerationError: {0}")]
    CodeGeneration(#[from] CodegenError),

    /// The transformation script is malformed
    #[error("ScriptError: {0}")]
    Script(#[from] ScriptError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PsyError {
    /// Short name of the error kind, as shown to users.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PsyError::Lexer(_) => "LexerError",
            PsyError::Parse(_) => "ParseError",
            PsyError::Metadata(_) => "MetadataError",
            PsyError::UnresolvedKernel(_) => "UnresolvedKernelError",
            PsyError::ArgumentMismatch(_) => "ArgumentMismatchError",
            PsyError::InapplicableTransformation(_) => "InapplicableTransformationError",
            PsyError::AlreadyTransformed(_) => "AlreadyTransformedError",
            PsyError::CodeGeneration(_) => "CodeGenerationError",
            PsyError::Script(_) => "ScriptError",
            PsyError::Internal(_) => "InternalError",
            PsyError::Io(_) => "IoError",
        }
    }

    /// Whether an optional script step may skip over this error.
    pub fn is_transformation_rejection(&self) -> bool {
        matches!(
            self,
            PsyError::InapplicableTransformation(_) | PsyError::AlreadyTransformed(_)
        )
    }
}

/// Error during lexical analysis.
#[derive(Error, Debug, Clone)]
pub struct LexerError {
    /// The error message
    pub message: String,
    /// Location in source
    pub span: Span,
    /// The kind of lexer error
    pub kind: LexerErrorKind,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexerErrorKind {
    /// Unexpected character
    UnexpectedChar,
    /// Unterminated string literal
    UnterminatedString,
    /// Invalid number literal
    InvalidNumber,
    /// Unterminated `.op.` or logical literal
    InvalidDotOperator,
}

/// Error during parsing.
#[derive(Error, Debug, Clone)]
pub struct ParseError {
    /// The error message
    pub message: String,
    /// Location in source
    pub span: Span,
    /// The kind of parse error
    pub kind: ParseErrorKind,
    /// Expected tokens (if applicable)
    pub expected: Vec<String>,
    /// What was found
    pub found: Option<String>,
}

impl ParseError {
    /// Create a parse error with no expectation list.
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
            expected: Vec::new(),
            found: None,
        }
    }

    /// Attach the text that was found instead.
    pub fn with_found(mut self, found: impl Into<String>) -> Self {
        self.found = Some(found.into());
        self
    }

    /// Attach what was expected.
    pub fn expecting(mut self, expected: impl Into<String>) -> Self {
        self.expected.push(expected.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)?;
        if !self.expected.is_empty() {
            write!(f, " (expected: {})", self.expected.join(", "))?;
        }
        if let Some(ref found) = self.found {
            write!(f, " (found: {})", found)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Unexpected token
    UnexpectedToken,
    /// Expected a specific token
    ExpectedToken,
    /// Expected an identifier
    ExpectedIdentifier,
    /// Mismatched brackets/parentheses
    MismatchedDelimiter,
    /// Unexpected end of file
    UnexpectedEof,
    /// Two invokes carry the same label
    DuplicateInvokeName,
    /// Construct the frontend does not understand
    Unsupported,
}

/// Malformed kernel metadata.
#[derive(Error, Debug, Clone)]
pub struct MetadataError {
    /// Kernel type the metadata belongs to (empty when not yet known)
    pub kernel: String,
    /// 1-based position in `meta_args`, when the problem is argument specific
    pub argument: Option<usize>,
    /// Human readable statement of the violated rule
    pub message: String,
    /// Location in the kernel source
    pub span: Option<Span>,
}

impl MetadataError {
    pub fn new(kernel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kernel: kernel.into(),
            argument: None,
            message: message.into(),
            span: None,
        }
    }

    pub fn at_argument(mut self, position: usize) -> Self {
        self.argument = Some(position);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel '{}'", self.kernel)?;
        if let Some(arg) = self.argument {
            write!(f, ", argument {}", arg)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(ref span) = self.span {
            write!(f, " at {}", span)?;
        }
        Ok(())
    }
}

/// A kernel referenced from an invoke has no matching signature.
#[derive(Error, Debug, Clone)]
pub struct UnresolvedKernelError {
    /// The name as written in the invoke
    pub kernel: String,
    /// The invoke containing the reference
    pub invoke: String,
    /// Closest known kernel name, if any is similar enough
    pub suggestion: Option<String>,
    /// Location of the reference
    pub span: Span,
}

impl fmt::Display for UnresolvedKernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kernel '{}' used in {} at {} has no metadata",
            self.kernel, self.invoke, self.span
        )?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{}'?)", s)?;
        }
        Ok(())
    }
}

/// Actual arguments at a call site disagree with the kernel declaration.
#[derive(Error, Debug, Clone)]
pub struct ArgumentMismatchError {
    /// Kernel being called
    pub kernel: String,
    /// Invoke containing the call
    pub invoke: String,
    /// What disagrees
    pub reason: MismatchReason,
    /// Location of the kernel reference
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchReason {
    /// Wrong number of actual arguments
    Count { expected: usize, found: usize },
    /// An argument that must be a variable was given as something else
    NotAVariable { position: usize, text: String },
}

impl fmt::Display for ArgumentMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            MismatchReason::Count { expected, found } => write!(
                f,
                "kernel '{}' in {} expects {} actual argument(s) but {} supplied at {}",
                self.kernel, self.invoke, expected, found, self.span
            ),
            MismatchReason::NotAVariable { position, text } => write!(
                f,
                "argument {} ('{}') of kernel '{}' in {} must be a variable at {}",
                position, text, self.kernel, self.invoke, self.span
            ),
        }
    }
}

/// A transformation is not applicable to its target.
#[derive(Error, Debug, Clone)]
pub struct InapplicableTransformationError {
    /// The transformation that was rejected
    pub transformation: String,
    /// Description of the target node
    pub node: String,
    /// The violated contract
    pub message: String,
}

impl InapplicableTransformationError {
    pub fn new(
        transformation: impl Into<String>,
        node: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            transformation: transformation.into(),
            node: node.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for InapplicableTransformationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cannot be applied to {}: {}", self.transformation, self.node, self.message)
    }
}

/// The node was already transformed this way.
#[derive(Error, Debug, Clone)]
pub struct AlreadyTransformedError {
    pub transformation: String,
    pub node: String,
}

impl fmt::Display for AlreadyTransformedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} has already been applied to {}", self.transformation, self.node)
    }
}

/// Error during code generation.
#[derive(Error, Debug, Clone)]
pub struct CodegenError {
    /// The error message
    pub message: String,
    /// The kind of codegen error
    pub kind: CodegenErrorKind,
}

impl CodegenError {
    pub fn new(kind: CodegenErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenErrorKind {
    /// Directive placed where the target model does not allow it
    MisplacedDirective,
    /// Name cannot be expressed as a Fortran identifier
    InvalidIdentifier,
    /// Feature not supported in the output dialect
    UnsupportedFeature,
}

/// Malformed transformation script.
#[derive(Error, Debug, Clone)]
pub struct ScriptError {
    /// Step index (0-based) when the problem is step specific
    pub step: Option<usize>,
    pub message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { step: None, message: message.into() }
    }

    pub fn at_step(step: usize, message: impl Into<String>) -> Self {
        Self { step: Some(step), message: message.into() }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "step {}: {}", step, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Result type using PsyError.
pub type PsyResult<T> = Result<T, PsyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError {
            message: "Unexpected token".to_string(),
            span: Span::new(1, 5, 1, 10),
            kind: ParseErrorKind::UnexpectedToken,
            expected: vec!["identifier".to_string()],
            found: Some("number".to_string()),
        };
        let s = format!("{}", err);
        assert!(s.contains("Unexpected token"));
        assert!(s.contains("identifier"));
    }

    #[test]
    fn test_kind_name_in_message() {
        let err: PsyError = ArgumentMismatchError {
            kernel: "testkern_type".into(),
            invoke: "invoke_0".into(),
            reason: MismatchReason::Count { expected: 3, found: 2 },
            span: Span::new(4, 12, 4, 30),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.starts_with("ArgumentMismatchError"));
        assert!(msg.contains("expects 3"));
        assert_eq!(err.kind_name(), "ArgumentMismatchError");
    }

    #[test]
    fn test_rejections_are_skippable() {
        let err: PsyError = AlreadyTransformedError {
            transformation: "colour".into(),
            node: "loop 0".into(),
        }
        .into();
        assert!(err.is_transformation_rejection());
        let err: PsyError = ScriptError::new("bad").into();
        assert!(!err.is_transformation_rejection());
    }
}
