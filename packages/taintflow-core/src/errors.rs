//! Error types for taintflow-core
//!
//! Provides unified error handling across the crate.
//!
//! Recoverable conditions (parse failures, malformed model declarations,
//! configuration problems) travel as `Result`s. Panics are reserved for
//! invariant violations in the abstract-domain tree and the fixpoint state
//! machine.

use thiserror::Error;

/// Main error type for taintflow operations
#[derive(Debug, Error)]
pub enum TaintflowError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error in a source module
    #[error("Parse error in `{qualifier}`: {message}")]
    Parse { qualifier: String, message: String },

    /// Model DSL error (accumulated per declaration, never aborts a batch;
    /// this variant is for a document that cannot be read at all)
    #[error("Model DSL error: {0}")]
    ModelDsl(String),

    /// Fixpoint did not converge within the iteration budget
    #[error("Fixpoint did not converge after {iterations} iterations; {unstable} targets still unstable")]
    FixpointDivergence { iterations: u32, unstable: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error (persisted model heap)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stale persisted state (epoch mismatch)
    #[error("Stale cache: snapshot epoch {found} does not match expected {expected}")]
    StaleSnapshot { expected: u32, found: u32 },
}

impl TaintflowError {
    /// Create a parse error
    pub fn parse(qualifier: impl Into<String>, message: impl Into<String>) -> Self {
        TaintflowError::Parse {
            qualifier: qualifier.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        TaintflowError::Config(msg.into())
    }
}

/// Result type alias for taintflow operations
pub type Result<T> = std::result::Result<T, TaintflowError>;
