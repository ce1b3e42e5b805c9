//! Override graph
//!
//! For a method `Base.m`, the set of classes in `Base`'s subtree that
//! re-declare `m`. Drives the synthetic override targets the fixpoint
//! joins over.

use super::targets::DefineIndex;
use crate::features::type_env::TypeEnvironment;
use crate::shared::models::Target;
use rustc_hash::FxHashMap;

/// (class, method) → overriding classes
#[derive(Debug, Default)]
pub struct OverrideGraph {
    overrides: FxHashMap<(String, String), Vec<String>>,
}

impl OverrideGraph {
    /// Build from the define index: a method `Sub.m` overrides `Base.m`
    /// when `Base` appears in `Sub`'s transitive bases and declares `m`.
    pub fn build(env: &TypeEnvironment, index: &DefineIndex) -> Self {
        let mut overrides: FxHashMap<(String, String), Vec<String>> = FxHashMap::default();

        for define in index.methods() {
            let Target::Method { class, name, .. } = &define.target else {
                continue;
            };
            // Walk the base chain; every ancestor declaring the same method
            // gains this class as an override.
            let mut stack = env.class_bases(class);
            let mut visited = rustc_hash::FxHashSet::default();
            while let Some(ancestor) = stack.pop() {
                if !visited.insert(ancestor.clone()) {
                    continue;
                }
                if let Some(summary) = env.class_summary(&ancestor) {
                    if summary.method(name).is_some() {
                        overrides
                            .entry((ancestor.clone(), name.clone()))
                            .or_default()
                            .push(class.clone());
                    }
                    stack.extend(summary.bases.iter().cloned());
                }
            }
        }

        for subclasses in overrides.values_mut() {
            subclasses.sort();
            subclasses.dedup();
        }
        Self { overrides }
    }

    /// Classes overriding `class.method`, deterministically ordered
    pub fn get_overriding_types(&self, class: &str, method: &str) -> &[String] {
        self.overrides
            .get(&(class.to_string(), method.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_overrides(&self, class: &str, method: &str) -> bool {
        !self.get_overriding_types(class, method).is_empty()
    }

    /// Every method that has at least one override, as method targets
    pub fn overridden_methods(&self) -> impl Iterator<Item = Target> + '_ {
        let mut keys: Vec<&(String, String)> = self.overrides.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|(class, method)| Target::method(class.clone(), method.clone()))
    }
}
