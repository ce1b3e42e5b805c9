//! Source preprocessing
//!
//! Turns a raw parse into the form the environment layers consume:
//! wildcard imports expanded against the imported module's export set,
//! local names mapped to fully qualified targets, and decorators lifted
//! into structured behavior flags.

use super::ast::{Expr, FunctionDef, ParsedSource, Stmt};
use crate::shared::models::Qualifier;
use rustc_hash::{FxHashMap, FxHashSet};

/// Externally visible names of a module, sorted for deterministic
/// comparison across re-parses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportSet {
    pub names: Vec<String>,
}

impl ExportSet {
    pub fn contains(&self, name: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }
}

/// Behavior flags lifted from a function's decorators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoratorBehavior {
    pub is_property: bool,
    pub is_setter: bool,
    pub is_staticmethod: bool,
    pub is_classmethod: bool,
    pub is_override: bool,

    /// Decorator names the analyzer does not recognize
    pub unrecognized: Vec<String>,
}

/// Lift a function's decorator list into the enumerated behavior domain
pub fn lift_decorators(def: &FunctionDef) -> DecoratorBehavior {
    let mut behavior = DecoratorBehavior::default();
    for decorator in &def.decorators {
        let dotted = match decorator {
            Expr::Call { func, .. } => func.as_dotted_name(),
            other => other.as_dotted_name(),
        };
        let Some(name) = dotted else {
            behavior.unrecognized.push("<expression>".to_string());
            continue;
        };
        match name.as_str() {
            "property" => behavior.is_property = true,
            "staticmethod" => behavior.is_staticmethod = true,
            "classmethod" => behavior.is_classmethod = true,
            "override" | "typing.override" => behavior.is_override = true,
            "abstractmethod" | "abc.abstractmethod" | "functools.lru_cache"
            | "functools.cache" | "functools.wraps" | "dataclass" | "dataclasses.dataclass" => {}
            _ if name.ends_with(".setter") => behavior.is_setter = true,
            _ if name.ends_with(".getter") || name.ends_with(".deleter") => {}
            other => behavior.unrecognized.push(other.to_string()),
        }
    }
    behavior
}

/// Preprocessed module ready for the environment layers
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSource {
    pub source: ParsedSource,

    /// Local name → fully qualified target, from import statements
    /// (wildcards already expanded)
    pub import_aliases: FxHashMap<String, String>,

    /// Names defined at module top level
    pub toplevel_names: FxHashSet<String>,

    pub exports: ExportSet,

    /// Wildcard-imported modules this expansion depended on
    pub wildcard_dependencies: Vec<Qualifier>,
}

impl ProcessedSource {
    pub fn qualifier(&self) -> &Qualifier {
        &self.source.qualifier
    }

    /// Resolve a dotted reference appearing in this module to a fully
    /// qualified name: import aliases first, then module-level definitions,
    /// then the name itself (builtins and unknowns pass through).
    pub fn qualify(&self, dotted: &str) -> String {
        let (head, rest) = match dotted.find('.') {
            Some(idx) => (&dotted[..idx], &dotted[idx..]),
            None => (dotted, ""),
        };
        if let Some(target) = self.import_aliases.get(head) {
            return format!("{target}{rest}");
        }
        if self.toplevel_names.contains(head) {
            return format!("{}{}", self.source.qualifier.child(head), rest);
        }
        dotted.to_string()
    }
}

/// Compute a module's export set: `__all__` when assigned a literal list,
/// otherwise every top-level binding not starting with an underscore.
pub fn compute_exports(source: &ParsedSource) -> ExportSet {
    if let Some(all) = explicit_all(source) {
        let mut names = all;
        names.sort();
        names.dedup();
        return ExportSet { names };
    }

    let mut names: Vec<String> = toplevel_bindings(source)
        .into_iter()
        .filter(|n| !n.starts_with('_'))
        .collect();
    names.sort();
    names.dedup();
    ExportSet { names }
}

fn explicit_all(source: &ParsedSource) -> Option<Vec<String>> {
    for stmt in &source.statements {
        let Stmt::Assign { targets, value: Some(value), .. } = stmt else {
            continue;
        };
        let is_all = targets
            .iter()
            .any(|t| matches!(t, Expr::Name { id, .. } if id == "__all__"));
        if !is_all {
            continue;
        }
        if let Expr::List { elts, .. } | Expr::Tuple { elts, .. } = value {
            let names = elts
                .iter()
                .filter_map(|e| match e {
                    Expr::Constant {
                        value: super::ast::Constant::Str(s),
                        ..
                    } => Some(s.clone()),
                    _ => None,
                })
                .collect();
            return Some(names);
        }
    }
    None
}

fn toplevel_bindings(source: &ParsedSource) -> Vec<String> {
    let mut names = Vec::new();
    for stmt in &source.statements {
        match stmt {
            Stmt::FunctionDef(def) => names.push(def.name.clone()),
            Stmt::ClassDef(def) => names.push(def.name.clone()),
            Stmt::Assign { targets, .. } => {
                for target in targets {
                    collect_binding_names(target, &mut names);
                }
            }
            Stmt::Import { names: aliases, .. } => {
                for alias in aliases {
                    match &alias.alias {
                        Some(local) => names.push(local.clone()),
                        None => {
                            // `import a.b` binds the top-level name `a`.
                            let head = alias.name.split('.').next().unwrap_or(&alias.name);
                            names.push(head.to_string());
                        }
                    }
                }
            }
            Stmt::ImportFrom {
                names: aliases,
                is_wildcard: false,
                ..
            } => {
                for alias in aliases {
                    names.push(alias.alias.clone().unwrap_or_else(|| alias.name.clone()));
                }
            }
            _ => {}
        }
    }
    names
}

fn collect_binding_names(target: &Expr, out: &mut Vec<String>) {
    match target {
        Expr::Name { id, .. } => out.push(id.clone()),
        Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
            for elt in elts {
                collect_binding_names(elt, out);
            }
        }
        Expr::Starred { value, .. } => collect_binding_names(value, out),
        _ => {}
    }
}

/// Expand imports and collect the alias table.
///
/// `get_exports` answers wildcard expansion requests; returning `None`
/// (module unknown or unparsable) expands to nothing, which matches
/// treating the failed module as an any-getattr stub whose names cannot be
/// enumerated.
pub fn preprocess(
    source: ParsedSource,
    get_exports: &mut dyn FnMut(&Qualifier) -> Option<ExportSet>,
) -> ProcessedSource {
    let mut import_aliases = FxHashMap::default();
    let mut wildcard_dependencies = Vec::new();

    for stmt in &source.statements {
        match stmt {
            Stmt::Import { names, .. } => {
                for alias in names {
                    match &alias.alias {
                        Some(local) => {
                            import_aliases.insert(local.clone(), alias.name.clone());
                        }
                        None => {
                            let head = alias.name.split('.').next().unwrap_or(&alias.name);
                            import_aliases.insert(head.to_string(), head.to_string());
                        }
                    }
                }
            }
            Stmt::ImportFrom {
                module,
                names,
                is_wildcard,
                ..
            } => {
                if *is_wildcard {
                    wildcard_dependencies.push(module.clone());
                    if let Some(exports) = get_exports(module) {
                        for name in &exports.names {
                            import_aliases
                                .insert(name.clone(), module.child(name).as_str().to_string());
                        }
                    }
                } else {
                    for alias in names {
                        let local = alias.alias.clone().unwrap_or_else(|| alias.name.clone());
                        import_aliases
                            .insert(local, module.child(&alias.name).as_str().to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let exports = compute_exports(&source);
    let toplevel_names: FxHashSet<String> = toplevel_bindings(&source).into_iter().collect();

    ProcessedSource {
        source,
        import_aliases,
        toplevel_names,
        exports,
        wildcard_dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::source_env::parser::{parse_module, ParseResult};

    fn parsed(qualifier: &str, content: &str) -> ParsedSource {
        match parse_module(Qualifier::new(qualifier), content) {
            ParseResult::Source(s) => s,
            ParseResult::Failure(f) => panic!("parse failure: {f:?}"),
        }
    }

    #[test]
    fn test_exports_skip_private_names() {
        let source = parsed("m", "x = 1\n_private = 2\ndef f():\n    pass\n");
        let exports = compute_exports(&source);

        assert_eq!(exports.names, vec!["f", "x"]);
        assert!(exports.contains("x"));
        assert!(!exports.contains("_private"));
    }

    #[test]
    fn test_explicit_all_wins() {
        let source = parsed("m", "__all__ = [\"a\"]\na = 1\nb = 2\n");
        let exports = compute_exports(&source);

        assert_eq!(exports.names, vec!["a"]);
    }

    #[test]
    fn test_import_aliases() {
        let source = parsed(
            "m",
            "import os\nimport os.path as p\nfrom a.b import c as d\n",
        );
        let processed = preprocess(source, &mut |_| None);

        assert_eq!(processed.import_aliases["os"], "os");
        assert_eq!(processed.import_aliases["p"], "os.path");
        assert_eq!(processed.import_aliases["d"], "a.b.c");
    }

    #[test]
    fn test_wildcard_expansion() {
        let source = parsed("m", "from lib import *\n");
        let processed = preprocess(source, &mut |q| {
            assert_eq!(q.as_str(), "lib");
            Some(ExportSet {
                names: vec!["helper".to_string(), "thing".to_string()],
            })
        });

        assert_eq!(processed.import_aliases["helper"], "lib.helper");
        assert_eq!(processed.import_aliases["thing"], "lib.thing");
        assert_eq!(processed.wildcard_dependencies, vec![Qualifier::new("lib")]);
    }

    #[test]
    fn test_qualify_resolution_order() {
        let source = parsed("m", "import os\ndef local():\n    pass\n");
        let processed = preprocess(source, &mut |_| None);

        assert_eq!(processed.qualify("os.environ"), "os.environ");
        assert_eq!(processed.qualify("local"), "m.local");
        assert_eq!(processed.qualify("eval"), "eval");
    }

    #[test]
    fn test_decorator_lifting() {
        let source = parsed(
            "m",
            "@property\ndef a(self):\n    return 1\n\n@a.setter\ndef a(self, v):\n    pass\n\n@mystery\ndef b():\n    pass\n",
        );
        let defs: Vec<&FunctionDef> = source
            .statements
            .iter()
            .filter_map(|s| match s {
                Stmt::FunctionDef(d) => Some(d),
                _ => None,
            })
            .collect();

        assert!(lift_decorators(defs[0]).is_property);
        assert!(lift_decorators(defs[1]).is_setter);
        assert_eq!(lift_decorators(defs[2]).unrecognized, vec!["mystery"]);
    }
}
