//! Common models shared by every feature slice
//!
//! Single source of truth for locations, module identities, callable
//! identities and diagnostic records. Feature slices depend on these types,
//! never the other way around.

mod diagnostic;
mod module_path;
mod span;
mod target;

pub use diagnostic::{
    Diagnostic, DiagnosticCode, DiagnosticLocation, Severity, TaintTraceFrame,
};
pub use module_path::{ModulePath, Qualifier, SearchRoot};
pub use span::{Location, Span};
pub use target::{Target, TargetKind};
