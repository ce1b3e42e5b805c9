//! Module identity and search-path resolution
//!
//! A `ModulePath` names one source unit. Qualifiers are dotted module
//! references (`myapp.services.user`); a qualifier resolves to at most one
//! explicit `ModulePath`, with stubs shadowing implementations and lower
//! priority tags winning among same-kind candidates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Dotted module reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Qualifier(String);

impl Qualifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The empty qualifier (top-level namespace)
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append one component: `a.b` + `c` → `a.b.c`
    pub fn child(&self, component: &str) -> Qualifier {
        if self.0.is_empty() {
            Qualifier(component.to_string())
        } else {
            Qualifier(format!("{}.{}", self.0, component))
        }
    }

    /// Drop the last component: `a.b.c` → `a.b`; top-level names map to empty
    pub fn parent(&self) -> Option<Qualifier> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('.') {
            Some(idx) => Some(Qualifier(self.0[..idx].to_string())),
            None => Some(Qualifier::empty()),
        }
    }

    /// Last dotted component (`a.b.c` → `c`)
    pub fn last_component(&self) -> &str {
        match self.0.rfind('.') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|c| !c.is_empty())
    }
}

impl std::fmt::Display for Qualifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Qualifier {
    fn from(s: &str) -> Self {
        Qualifier::new(s)
    }
}

/// One root of the ordered search path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRoot {
    pub path: PathBuf,

    /// Position in the search path; lower wins on qualifier collisions
    pub priority: u32,

    /// Roots holding third-party / typeshed code rather than project sources
    pub is_external: bool,
}

impl SearchRoot {
    pub fn new(path: impl Into<PathBuf>, priority: u32) -> Self {
        Self {
            path: path.into(),
            priority,
            is_external: false,
        }
    }

    pub fn external(path: impl Into<PathBuf>, priority: u32) -> Self {
        Self {
            path: path.into(),
            priority,
            is_external: true,
        }
    }
}

/// Identity of one source unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModulePath {
    pub qualifier: Qualifier,

    /// Path relative to its search root
    pub relative_path: PathBuf,

    /// Search-root priority; lower wins when qualifiers collide
    pub priority: u32,

    /// Declaration-only module (`.pyi`), consulted before implementations
    pub is_stub: bool,

    pub is_external: bool,

    /// `__init__` module representing its directory qualifier
    pub is_init: bool,
}

impl ModulePath {
    /// Resolve a relative path under a search root to a module identity.
    ///
    /// Strips the suffix, converts separators to dots, and maps `__init__`
    /// to the directory qualifier. Returns `None` for non-module files.
    pub fn from_relative(relative: &Path, root: &SearchRoot) -> Option<ModulePath> {
        let ext = relative.extension()?.to_str()?;
        let is_stub = match ext {
            "py" => false,
            "pyi" => true,
            _ => return None,
        };

        let stem_path = relative.with_extension("");
        let mut components: Vec<String> = Vec::new();
        for comp in stem_path.components() {
            let part = comp.as_os_str().to_str()?;
            if !is_identifier(part) && part != "__init__" {
                return None;
            }
            components.push(part.to_string());
        }

        let is_init = components.last().map(|c| c == "__init__").unwrap_or(false);
        if is_init {
            components.pop();
        }

        Some(ModulePath {
            qualifier: Qualifier::new(components.join(".")),
            relative_path: relative.to_path_buf(),
            priority: root.priority,
            is_stub,
            is_external: root.is_external,
            is_init,
        })
    }

    /// Shadowing resolution: does `self` win over `other` for one qualifier?
    ///
    /// Stubs beat implementations, then lower priority wins, then `__init__`
    /// packages beat plain modules, then ties resolve lexicographically by
    /// relative path so the outcome never depends on discovery order.
    pub fn shadows(&self, other: &ModulePath) -> bool {
        debug_assert_eq!(self.qualifier, other.qualifier);
        (
            !self.is_stub,
            self.priority,
            !self.is_init,
            self.relative_path.clone(),
        ) < (
            !other.is_stub,
            other.priority,
            !other.is_init,
            other.relative_path.clone(),
        )
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualifier_from_nested_path() {
        let root = SearchRoot::new("/repo/src", 0);
        let mp = ModulePath::from_relative(Path::new("myapp/services/user.py"), &root).unwrap();

        assert_eq!(mp.qualifier.as_str(), "myapp.services.user");
        assert!(!mp.is_stub);
        assert!(!mp.is_init);
    }

    #[test]
    fn test_init_maps_to_directory_qualifier() {
        let root = SearchRoot::new("/repo/src", 0);
        let mp = ModulePath::from_relative(Path::new("myapp/__init__.py"), &root).unwrap();

        assert_eq!(mp.qualifier.as_str(), "myapp");
        assert!(mp.is_init);
    }

    #[test]
    fn test_stub_shadows_implementation() {
        let src = SearchRoot::new("/repo/src", 1);
        let stubs = SearchRoot::external("/repo/stubs", 2);

        let imp = ModulePath::from_relative(Path::new("os/path.py"), &src).unwrap();
        let stub = ModulePath::from_relative(Path::new("os/path.pyi"), &stubs).unwrap();

        // Stub wins even from a lower-priority root.
        assert!(stub.shadows(&imp));
        assert!(!imp.shadows(&stub));
    }

    #[test]
    fn test_lower_priority_wins() {
        let first = SearchRoot::new("/repo/a", 0);
        let second = SearchRoot::new("/repo/b", 1);

        let a = ModulePath::from_relative(Path::new("pkg/mod.py"), &first).unwrap();
        let b = ModulePath::from_relative(Path::new("pkg/mod.py"), &second).unwrap();

        assert!(a.shadows(&b));
    }

    #[test]
    fn test_init_tie_resolves_deterministically() {
        let root = SearchRoot::new("/repo/src", 0);
        let a = ModulePath::from_relative(Path::new("aaa/__init__.py"), &root).unwrap();
        let mut b = ModulePath::from_relative(Path::new("zzz/__init__.py"), &root).unwrap();
        b.qualifier = a.qualifier.clone();

        assert!(a.shadows(&b));
        assert!(!b.shadows(&a));
    }

    #[test]
    fn test_non_module_files_rejected() {
        let root = SearchRoot::new("/repo/src", 0);
        assert!(ModulePath::from_relative(Path::new("README.md"), &root).is_none());
        assert!(ModulePath::from_relative(Path::new("data-v2/x.py"), &root).is_none());
    }

    #[test]
    fn test_qualifier_navigation() {
        let q = Qualifier::new("a.b.c");
        assert_eq!(q.last_component(), "c");
        assert_eq!(q.parent().unwrap().as_str(), "a.b");
        assert_eq!(q.child("d").as_str(), "a.b.c.d");
        assert_eq!(Qualifier::new("top").parent().unwrap(), Qualifier::empty());
    }
}
