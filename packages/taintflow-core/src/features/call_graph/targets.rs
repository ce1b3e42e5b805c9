//! Callable enumeration
//!
//! Walks every module and indexes each analyzable define by its target
//! identity. The fixpoint driver, the model-query evaluator and the
//! analyzers all work from this index.

use crate::features::source_env::ast::{ClassDef, FunctionDef, Stmt};
use crate::features::source_env::preprocess::lift_decorators;
use crate::features::type_env::TypeEnvironment;
use crate::shared::models::{Qualifier, Target, TargetKind};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// One analyzable callable with its AST
#[derive(Debug, Clone)]
pub struct Define {
    pub target: Target,
    pub qualifier: Qualifier,

    /// Enclosing class FQN for methods
    pub class: Option<String>,

    pub def: FunctionDef,
}

impl Define {
    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// Index of every define in the environment
#[derive(Default)]
pub struct DefineIndex {
    defines: FxHashMap<Target, Arc<Define>>,

    /// Deterministic enumeration order
    order: Vec<Target>,
}

impl DefineIndex {
    /// Enumerate all modules in the environment
    pub fn build(env: &TypeEnvironment) -> Self {
        let mut index = DefineIndex::default();
        for qualifier in env.source_env().qualifiers() {
            let Some(processed) = env.source_env().get(&qualifier, None) else {
                continue;
            };
            for stmt in &processed.source.statements {
                match stmt {
                    Stmt::FunctionDef(def) => index.add_function(&qualifier, def),
                    Stmt::ClassDef(class) => index.add_class(&qualifier, class),
                    _ => {}
                }
            }
        }
        index.order.sort();
        index
    }

    fn add_function(&mut self, qualifier: &Qualifier, def: &FunctionDef) {
        let kind = target_kind(def);
        let target = Target::Function {
            name: qualifier.child(&def.name).as_str().to_string(),
            kind,
        };
        self.insert(Define {
            target: target.clone(),
            qualifier: qualifier.clone(),
            class: None,
            def: def.clone(),
        });
    }

    fn add_class(&mut self, qualifier: &Qualifier, class: &ClassDef) {
        let class_fqn = qualifier.child(&class.name).as_str().to_string();
        for stmt in &class.body {
            match stmt {
                Stmt::FunctionDef(def) => {
                    let target = Target::Method {
                        class: class_fqn.clone(),
                        name: def.name.clone(),
                        kind: target_kind(def),
                    };
                    self.insert(Define {
                        target: target.clone(),
                        qualifier: qualifier.clone(),
                        class: Some(class_fqn.clone()),
                        def: def.clone(),
                    });
                }
                // Nested classes become dotted class names.
                Stmt::ClassDef(nested) => {
                    self.add_class(&Qualifier::new(class_fqn.clone()), nested)
                }
                _ => {}
            }
        }
    }

    fn insert(&mut self, define: Define) {
        let target = define.target.clone();
        if self
            .defines
            .insert(target.clone(), Arc::new(define))
            .is_none()
        {
            self.order.push(target);
        }
    }

    pub fn get(&self, target: &Target) -> Option<&Arc<Define>> {
        self.defines.get(target)
    }

    pub fn contains(&self, target: &Target) -> bool {
        self.defines.contains_key(target)
    }

    /// All targets in deterministic order
    pub fn targets(&self) -> &[Target] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All plain functions, for `ModelQuery(find="functions")`
    pub fn functions(&self) -> impl Iterator<Item = &Arc<Define>> {
        self.order.iter().filter_map(|t| match t {
            Target::Function { .. } => self.defines.get(t),
            _ => None,
        })
    }

    /// All methods, for `ModelQuery(find="methods")`
    pub fn methods(&self) -> impl Iterator<Item = &Arc<Define>> {
        self.order.iter().filter_map(|t| match t {
            Target::Method { .. } => self.defines.get(t),
            _ => None,
        })
    }
}

fn target_kind(def: &FunctionDef) -> TargetKind {
    if lift_decorators(def).is_setter {
        TargetKind::PropertySetter
    } else {
        TargetKind::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dependency::DependencyTracker;
    use crate::features::source_env::SourceEnvironment;
    use crate::shared::models::SearchRoot;
    use std::path::PathBuf;

    fn index_for(files: &[(&str, &str)]) -> DefineIndex {
        let tracker = Arc::new(DependencyTracker::new());
        let source = Arc::new(SourceEnvironment::new(
            vec![SearchRoot::new("/src", 0)],
            tracker,
        ));
        source.add_sources(
            files
                .iter()
                .map(|(p, c)| (PathBuf::from(format!("/src/{p}")), c.to_string())),
        );
        DefineIndex::build(&TypeEnvironment::new(source))
    }

    #[test]
    fn test_indexes_functions_and_methods() {
        let index = index_for(&[(
            "m.py",
            "def f():\n    pass\n\nclass C:\n    def m(self):\n        pass\n",
        )]);

        assert!(index.contains(&Target::function("m.f")));
        assert!(index.contains(&Target::method("m.C", "m")));
        assert_eq!(index.functions().count(), 1);
        assert_eq!(index.methods().count(), 1);
    }

    #[test]
    fn test_property_setter_kind() {
        let index = index_for(&[(
            "m.py",
            "class C:\n    @property\n    def v(self):\n        return 1\n    @v.setter\n    def v(self, x):\n        pass\n",
        )]);

        assert!(index.contains(&Target::Method {
            class: "m.C".to_string(),
            name: "v".to_string(),
            kind: TargetKind::Normal,
        }));
        assert!(index.contains(&Target::Method {
            class: "m.C".to_string(),
            name: "v".to_string(),
            kind: TargetKind::PropertySetter,
        }));
    }

    #[test]
    fn test_deterministic_order() {
        let index = index_for(&[
            ("b.py", "def two():\n    pass\n"),
            ("a.py", "def one():\n    pass\n"),
        ]);
        let names: Vec<String> = index.targets().iter().map(|t| t.to_string()).collect();

        assert_eq!(names, vec!["a.one", "b.two"]);
    }
}
