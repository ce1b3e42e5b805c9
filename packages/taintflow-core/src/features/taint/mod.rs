//! Taint abstract model
//!
//! The tree-valued per-callable state the fixpoint propagates: a forward
//! source tree, a backward sink tree, a taint-in-taint-out tree, and the
//! analysis mode. Leaves are a product of kind set, trace info and
//! breadcrumbs.

mod element;
mod kinds;
mod model;
mod trace;

pub use element::{FlowDetails, TaintElement};
pub use kinds::{Breadcrumb, SinkKind, SourceKind, TitoKind};
pub use model::{
    BackwardModel, Mode, SanitizeFilter, Sanitizers, TaintModel, RETURN_PORT,
};
pub use trace::TraceInfo;

use crate::features::abstract_domain::DomainTree;

/// Forward state: which sources reach which access paths
pub type SourceTaint = TaintElement<SourceKind>;
pub type SourceTree = DomainTree<SourceTaint>;

/// Backward state: which access paths flow into which sinks
pub type SinkTaint = TaintElement<SinkKind>;
pub type SinkTree = DomainTree<SinkTaint>;

/// Taint-in-taint-out state
pub type TitoTaint = TaintElement<TitoKind>;
pub type TitoTree = DomainTree<TitoTaint>;
