//! Callable identities
//!
//! A `Target` names one unit of interprocedural analysis: a plain function,
//! a method, the synthetic join of a method with all its overrides, or a
//! global/attribute object. Targets key the shared-memory tables, so their
//! representation must hash stably.

use crate::shared::models::Qualifier;
use serde::{Deserialize, Serialize};

/// Callable flavor: `PropertySetter` distinguishes `@x.setter` bodies that
/// share a name with their getter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetKind {
    Normal,
    PropertySetter,
}

/// Identity of one analysis unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Target {
    /// Module-level function, named by its fully qualified name
    Function { name: String, kind: TargetKind },

    /// Method on a class
    Method {
        class: String,
        name: String,
        kind: TargetKind,
    },

    /// Synthetic target joining a method with all its concrete overrides
    Override {
        class: String,
        name: String,
        kind: TargetKind,
    },

    /// Global variable or class attribute
    Object { name: String },
}

impl Target {
    pub fn function(name: impl Into<String>) -> Self {
        Target::Function {
            name: name.into(),
            kind: TargetKind::Normal,
        }
    }

    pub fn method(class: impl Into<String>, name: impl Into<String>) -> Self {
        Target::Method {
            class: class.into(),
            name: name.into(),
            kind: TargetKind::Normal,
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        Target::Object { name: name.into() }
    }

    /// The override target corresponding to a method target.
    ///
    /// Returns `None` for functions and objects, which have no override set.
    pub fn as_override(&self) -> Option<Target> {
        match self {
            Target::Method { class, name, kind } | Target::Override { class, name, kind } => {
                Some(Target::Override {
                    class: class.clone(),
                    name: name.clone(),
                    kind: *kind,
                })
            }
            _ => None,
        }
    }

    /// The concrete method a synthetic override target was derived from
    pub fn corresponding_method(&self) -> Option<Target> {
        match self {
            Target::Override { class, name, kind } => Some(Target::Method {
                class: class.clone(),
                name: name.clone(),
                kind: *kind,
            }),
            _ => None,
        }
    }

    /// Whether per-callable results are stored for this target (cold path).
    /// Override and object targets only carry models.
    pub fn has_results(&self) -> bool {
        matches!(self, Target::Function { .. } | Target::Method { .. })
    }

    /// Fully qualified display name (`pkg.mod.Class.method`)
    pub fn qualified_name(&self) -> String {
        match self {
            Target::Function { name, .. } => name.clone(),
            Target::Method { class, name, .. } => format!("{class}.{name}"),
            Target::Override { class, name, .. } => format!("Overrides{{{class}.{name}}}"),
            Target::Object { name } => name.clone(),
        }
    }

    /// Qualifier of the module a target's definition lives in, derived from
    /// its qualified name by dropping the trailing callable components.
    pub fn module_qualifier(&self) -> Qualifier {
        let full = match self {
            Target::Function { name, .. } | Target::Object { name } => name.clone(),
            Target::Method { class, .. } | Target::Override { class, .. } => class.clone(),
        };
        match full.rfind('.') {
            Some(idx) => Qualifier::new(&full[..idx]),
            None => Qualifier::empty(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_round_trip() {
        let m = Target::method("pkg.Base", "handle");
        let o = m.as_override().unwrap();

        assert!(matches!(o, Target::Override { .. }));
        assert_eq!(o.corresponding_method().unwrap(), m);
    }

    #[test]
    fn test_results_stored_only_for_callables() {
        assert!(Target::function("pkg.f").has_results());
        assert!(Target::method("pkg.C", "m").has_results());
        assert!(!Target::object("pkg.g").has_results());
        assert!(!Target::method("pkg.C", "m")
            .as_override()
            .unwrap()
            .has_results());
    }

    #[test]
    fn test_module_qualifier() {
        assert_eq!(
            Target::function("pkg.mod.f").module_qualifier().as_str(),
            "pkg.mod"
        );
        assert_eq!(
            Target::method("pkg.mod.C", "m").module_qualifier().as_str(),
            "pkg.mod"
        );
    }
}
