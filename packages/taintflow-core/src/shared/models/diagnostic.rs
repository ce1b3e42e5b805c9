//! Diagnostic records
//!
//! The flat output shape shared by the type checker and the taint analysis.
//! Serialized as a JSON list; taint issues additionally carry a trace.

use crate::shared::models::Span;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Diagnostic category code.
///
/// Type-check categories use the fixed small codes; parse errors are 404,
/// unawaited awaitables 1001, and taint issues use the code of the rule that
/// matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagnosticCode(pub u32);

impl DiagnosticCode {
    pub const MISSING_RETURN_ANNOTATION: DiagnosticCode = DiagnosticCode(3);
    pub const MISSING_GLOBAL_ANNOTATION: DiagnosticCode = DiagnosticCode(5);
    pub const INCOMPATIBLE_PARAMETER_TYPE: DiagnosticCode = DiagnosticCode(6);
    pub const INCOMPATIBLE_RETURN_TYPE: DiagnosticCode = DiagnosticCode(7);
    pub const INCOMPATIBLE_ATTRIBUTE_TYPE: DiagnosticCode = DiagnosticCode(8);
    pub const INCOMPATIBLE_VARIABLE_TYPE: DiagnosticCode = DiagnosticCode(9);
    pub const UNDEFINED_TYPE: DiagnosticCode = DiagnosticCode(11);
    pub const MISSING_ARGUMENT: DiagnosticCode = DiagnosticCode(14);
    pub const UNEXPECTED_KEYWORD: DiagnosticCode = DiagnosticCode(15);
    pub const UNDEFINED_ATTRIBUTE: DiagnosticCode = DiagnosticCode(16);
    pub const UNDEFINED_NAME: DiagnosticCode = DiagnosticCode(18);
    pub const INVALID_TYPE_PARAMETERS: DiagnosticCode = DiagnosticCode(24);
    pub const UNSUPPORTED_OPERAND: DiagnosticCode = DiagnosticCode(31);
    pub const INVALID_TYPE_VARIABLE: DiagnosticCode = DiagnosticCode(34);
    pub const UNDEFINED_IMPORT: DiagnosticCode = DiagnosticCode(36);
    pub const INCOMPLETE_TYPE: DiagnosticCode = DiagnosticCode(37);
    pub const INVALID_DECORATION: DiagnosticCode = DiagnosticCode(41);
    pub const UNAWAITED_AWAITABLE: DiagnosticCode = DiagnosticCode(1001);
    pub const PARSE_ERROR: DiagnosticCode = DiagnosticCode(404);
}

/// Severity of a diagnostic; the process exit code is non-zero iff any
/// `Error` was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One frame of a taint trace (source-to-sink narration)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintTraceFrame {
    /// Callable the flow passes through
    pub callable: String,

    /// `source`, `sink`, or `propagation`
    pub kind: String,

    pub path: PathBuf,
    pub span: Span,
}

/// Location payload of a diagnostic, flattened for the wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLocation {
    pub path: PathBuf,
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl DiagnosticLocation {
    pub fn new(path: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            path: path.into(),
            line: span.start_line,
            col: span.start_col,
            end_line: span.end_line,
            end_col: span.end_col,
        }
    }
}

/// One reported problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub location: DiagnosticLocation,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taint_trace: Option<Vec<TaintTraceFrame>>,
}

impl Diagnostic {
    pub fn error(
        code: DiagnosticCode,
        path: impl Into<PathBuf>,
        span: Span,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity: Severity::Error,
            location: DiagnosticLocation::new(path, span),
            message: message.into(),
            taint_trace: None,
        }
    }

    pub fn warning(
        code: DiagnosticCode,
        path: impl Into<PathBuf>,
        span: Span,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, path, span, message)
        }
    }

    pub fn with_trace(mut self, trace: Vec<TaintTraceFrame>) -> Self {
        self.taint_trace = Some(trace);
        self
    }

    /// Stable ordering for deterministic output: path, position, code.
    pub fn sort_key(&self) -> (PathBuf, u32, u32, u32) {
        (
            self.location.path.clone(),
            self.location.line,
            self.location.col,
            self.code.0,
        )
    }
}
