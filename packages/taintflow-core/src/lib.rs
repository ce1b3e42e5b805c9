/*
 * Taintflow - whole-program taint analyzer
 *
 * Feature-first architecture:
 * - shared/      : common models (Span, ModulePath, Target, Diagnostic)
 * - features/    : vertical slices (abstract_domain, shared_memory,
 *                  source_env, dependency, type_env, call_graph, taint,
 *                  model_dsl, analyzer, fixpoint)
 * - pipeline/    : whole-program orchestration
 * - config/      : analysis configuration
 *
 * The analysis ingests source modules plus typed stubs, resolves symbols
 * across module boundaries, and produces type-check diagnostics plus a
 * taint-flow report driven by user-configured rules.
 */

/// Shared models and utilities
pub mod shared;

/// Feature modules
pub mod features;

/// Pipeline orchestration
pub mod pipeline;

/// Configuration system
pub mod config;

/// Error types
pub mod errors;

pub use errors::{Result, TaintflowError};
pub use pipeline::{AnalysisPipeline, AnalysisReport};
