//! Model verification errors
//!
//! Categorized, located, accumulated: a broken declaration never stops the
//! rest of the document from registering.

use crate::shared::models::Span;
use std::path::PathBuf;
use thiserror::Error;

/// What went wrong with one declaration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelErrorKind {
    /// The modeled entity is unknown to the environment. The span points at
    /// the nearest decorator so the declaration is easy to comment out.
    #[error("`{name}` is not part of the environment")]
    NotInEnvironment { name: String },

    #[error("Model signature parameter `{param}` does not exist in the implementation")]
    MissingNamedParameter { param: String },

    #[error("Parameter `{param}` is positional-only and cannot be named in a model")]
    UnexpectedPositionalOnlyParameter { param: String },

    #[error("Parameter `{param}` has an incompatible keyword position in the model")]
    UnexpectedNamedParameter { param: String },

    #[error("Unexpected decorator `{decorator}` in model")]
    UnexpectedDecorators { decorator: String },

    #[error("Default values in models must be written as `...`")]
    InvalidDefaultValue { param: String },

    #[error("Invalid taint annotation `{annotation}`")]
    InvalidTaintAnnotation { annotation: String },

    #[error("Invalid ModelQuery: {reason}")]
    InvalidModelQuery { reason: String },

    #[error("Model document has invalid syntax: {message}")]
    Syntax { message: String },
}

/// A located model error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub path: Option<PathBuf>,
    pub span: Span,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, span: Span) -> Self {
        Self {
            kind,
            path: None,
            span,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(
                f,
                "{}:{}: {}",
                path.display(),
                self.span.start_line,
                self.kind
            ),
            None => write!(f, "{}: {}", self.span.start_line, self.kind),
        }
    }
}
