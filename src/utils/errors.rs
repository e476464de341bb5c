//! Error types for the loop fission tool.
//!
//! This module defines all error types used throughout the crate,
//! organized by the phase that produces them.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::utils::location::Span;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum KfError {
    /// Error during lexing/tokenization
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    /// Error during parsing
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Malformed IR
    #[error("Verification error: {0}")]
    Verify(#[from] VerifyError),

    /// A fission stage rejected a function
    #[error("Fission error: {0}")]
    Fission(#[from] FissionError),

    /// Error while interpreting IR
    #[error("Interpreter error: {0}")]
    Interp(#[from] InterpError),
}

impl KfError {
    /// Source span of a lexer or parser error.
    pub fn span(&self) -> Option<Span> {
        match self {
            KfError::Lexer(e) => Some(e.span),
            KfError::Parse(e) => Some(e.span),
            _ => None,
        }
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
    /// Sigil (`%`, `@`, `!`) not followed by a name
    EmptyName,
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
    /// Create a parse error without expectation details.
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
            expected: Vec::new(),
            found: None,
        }
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
    /// Expected a type
    ExpectedType,
    /// Unknown instruction opcode
    UnknownOpcode,
    /// Reference to a value that is never defined
    UndefinedValue,
    /// Reference to a block that is never defined
    UndefinedBlock,
    /// Name defined twice in one function
    DuplicateDefinition,
    /// Unexpected end of file
    UnexpectedEof,
}

/// Structural problem found by the IR verifier.
#[derive(Error, Debug, Clone)]
pub struct VerifyError {
    /// The error message
    pub message: String,
    /// Function containing the problem
    pub function: String,
    /// The kind of verification failure
    pub kind: VerifyErrorKind,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in @{}", self.message, self.function)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyErrorKind {
    /// Block does not end in exactly one terminator
    BadTerminator,
    /// Phi node not at the start of its block
    MisplacedPhi,
    /// Phi incoming blocks differ from the block's predecessors
    PhiPredecessorMismatch,
    /// Operand refers to something that does not exist
    DanglingOperand,
    /// Definition does not dominate a use
    DominanceViolation,
    /// Function has no blocks
    EmptyFunction,
}

/// Why a function was not fissioned.
#[derive(Error, Debug, Clone, Serialize)]
pub struct FissionError {
    /// The error message
    pub message: String,
    /// The kind of fission failure
    pub kind: FissionErrorKind,
    /// The function being transformed
    pub function: String,
}

impl FissionError {
    /// Create a new fission error.
    pub fn new(kind: FissionErrorKind, function: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            function: function.into(),
        }
    }

    /// Render this error as a user-facing diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::warning(format!("@{} not fissioned: {}", self.function, self.message));
        match self.kind {
            FissionErrorKind::NotFissionable => diag.with_suggestion(
                "the entry block must branch unconditionally into the loop preheader",
            ),
            FissionErrorKind::NoInductionVariable => {
                diag.with_note("no header phi is incremented by an add of itself along the latch")
            }
            FissionErrorKind::DependentLoop => {
                diag.with_note("accesses to a shared base pointer have different access paths")
            }
            _ => diag,
        }
    }
}

impl fmt::Display for FissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {} in @{}", self.kind, self.message, self.function)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FissionErrorKind {
    /// Function contains no outermost loop
    NoCandidateLoop,
    /// No counter phi drives the loop
    NoInductionVariable,
    /// Start or end of the iteration range cannot be recovered
    BoundsNotRecoverable,
    /// Dependence analysis proved or failed to disprove a conflict
    DependentLoop,
    /// External region oracle vetoed the loop
    RegionRejected,
    /// Loop shape unsupported: missing preheader, latch or exit
    CloneFailed,
    /// Function entry shape unsupported
    NotFissionable,
}

/// Error raised by the IR interpreter.
#[derive(Error, Debug, Clone)]
pub struct InterpError {
    /// The error message
    pub message: String,
    /// The kind of interpreter error
    pub kind: InterpErrorKind,
}

impl fmt::Display for InterpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpErrorKind {
    /// Step budget exhausted
    StepLimit,
    /// Pointer access outside its buffer
    OutOfBounds,
    /// Operation on values of the wrong shape
    TypeMismatch,
    /// Reading a value that was never computed
    UndefinedValue,
    /// Division by zero
    DivisionByZero,
    /// Construct the interpreter does not model
    Unsupported,
}

/// A diagnostic message with severity level.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level
    pub severity: DiagnosticSeverity,
    /// Message
    pub message: String,
    /// Primary span
    pub span: Option<Span>,
    /// Additional notes
    pub notes: Vec<String>,
    /// Suggested fix (if any)
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    /// Error - processing cannot continue
    Error,
    /// Warning - processing continues, a function was left alone
    Warning,
    /// Note - informational message
    Note,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            span: None,
            notes: Vec::new(),
            suggestion: None,
        }
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
            span: None,
            notes: Vec::new(),
            suggestion: None,
        }
    }

    /// Add a span to the diagnostic.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Add a note to the diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Add a suggestion to the diagnostic.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Note => "note",
        };
        write!(f, "{}: {}", label, self.message)?;
        if let Some(span) = self.span {
            write!(f, " at {}", span)?;
        }
        for note in &self.notes {
            write!(f, "\n  note: {}", note)?;
        }
        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  help: {}", suggestion)?;
        }
        Ok(())
    }
}

/// Result type using KfError.
pub type KfResult<T> = Result<T, KfError>;
