//! Taint kinds and breadcrumbs
//!
//! Kinds are user-named: the rule configuration decides which source kind
//! may flow into which sink kind. The taint-in-taint-out lattice has the
//! two distinguished elements the propagation algebra needs.

use serde::{Deserialize, Serialize};

/// A named source kind (`UserSpecified`, `UserControlled`, ...)
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SourceKind(pub String);

impl SourceKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named sink kind (`CodeExecution`, `SqlInjection`, ...)
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SinkKind(pub String);

impl SinkKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Taint-in-taint-out element
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TitoKind {
    /// Taint reaching the parameter flows out through the return value
    LocalReturn,

    /// Taint reaching the parameter flows into positional parameter `i`
    ParameterUpdate(u32),
}

impl std::fmt::Display for TitoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TitoKind::LocalReturn => write!(f, "LocalReturn"),
            TitoKind::ParameterUpdate(i) => write!(f, "Updates[{i}]"),
        }
    }
}

/// A named tag carried along flows, used for filtering and issue narration
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Breadcrumb {
    /// Statically declared feature (`Via[shell]`)
    Feature(String),

    /// Dynamic feature materialized from an argument's value at the call
    /// site (`ViaValueOf[command]`)
    ViaValue { parameter: String, value: Option<String> },

    /// Tagged provenance for cross-repository flows
    CrossRepository(String),
}

impl Breadcrumb {
    pub fn feature(name: impl Into<String>) -> Self {
        Breadcrumb::Feature(name.into())
    }
}

impl std::fmt::Display for Breadcrumb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Breadcrumb::Feature(name) => write!(f, "via:{name}"),
            Breadcrumb::ViaValue { parameter, value } => match value {
                Some(v) => write!(f, "via-value:{parameter}={v}"),
                None => write!(f, "via-value:{parameter}"),
            },
            Breadcrumb::CrossRepository(id) => write!(f, "cross-repo:{id}"),
        }
    }
}
