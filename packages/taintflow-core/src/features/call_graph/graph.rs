//! Call-site resolution
//!
//! Maps every call expression in an analyzable define to the set of targets
//! it may dispatch to. Dynamic dispatch on `self` or on a parameter with a
//! known class type resolves to the synthetic override target when
//! overrides exist; unknown callees become opaque function targets so DSL
//! models can still attach to them.

use super::overrides::OverrideGraph;
use super::targets::{Define, DefineIndex};
use crate::features::dependency::DependencyKey;
use crate::features::source_env::ast::{Expr, Stmt};
use crate::features::source_env::ProcessedSource;
use crate::features::type_env::{ScalarType, TypeEnvironment};
use crate::shared::models::{Span, Target};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

/// One resolved call site within a caller
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub span: Span,
    pub targets: Vec<Target>,
}

/// Whole-program call graph with reverse edges
#[derive(Debug, Default)]
pub struct CallGraph {
    sites: FxHashMap<Target, Vec<CallSite>>,
    reverse: FxHashMap<Target, FxHashSet<Target>>,
}

impl CallGraph {
    pub fn build(env: &TypeEnvironment, index: &DefineIndex, overrides: &OverrideGraph) -> Self {
        let mut graph = CallGraph::default();

        for target in index.targets() {
            let Some(define) = index.get(target) else {
                continue;
            };
            let dep = env.tracker().register(DependencyKey::CallGraphOf(
                target.qualified_name(),
            ));
            let Some(processed) = env.source_env().get(&define.qualifier, Some(dep)) else {
                continue;
            };

            let resolver = CallResolver::new(env, index, overrides, define, &processed);
            let mut sites = Vec::new();
            collect_calls(&define.def.body, &mut |call_expr, span| {
                let targets = resolver.resolve(call_expr);
                trace!(caller = %target, ?span, count = targets.len(), "resolved call site");
                sites.push(CallSite { span, targets });
            });

            for site in &sites {
                for callee in &site.targets {
                    graph
                        .reverse
                        .entry(callee.clone())
                        .or_default()
                        .insert(target.clone());
                }
            }
            graph.sites.insert(target.clone(), sites);
        }

        // An override target recomputes when the method it joins, or any
        // overriding method, changes: record those as reverse edges.
        for method in overrides.overridden_methods() {
            let Target::Method { class, name, kind } = &method else {
                continue;
            };
            let override_target = Target::Override {
                class: class.clone(),
                name: name.clone(),
                kind: *kind,
            };
            graph
                .reverse
                .entry(method.clone())
                .or_default()
                .insert(override_target.clone());
            for sub in overrides.get_overriding_types(class, name) {
                graph
                    .reverse
                    .entry(Target::method(sub.clone(), name.clone()))
                    .or_default()
                    .insert(override_target.clone());
            }
        }

        graph
    }

    /// Call sites of one caller, in source order
    pub fn sites_of(&self, caller: &Target) -> &[CallSite] {
        self.sites.get(caller).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The resolved targets of the call at `span` within `caller`
    pub fn callees_at(&self, caller: &Target, span: Span) -> &[Target] {
        self.sites_of(caller)
            .iter()
            .find(|site| site.span == span)
            .map(|site| site.targets.as_slice())
            .unwrap_or(&[])
    }

    /// Deduplicated callees of one caller
    pub fn callees_of(&self, caller: &Target) -> Vec<Target> {
        let mut out: Vec<Target> = self
            .sites_of(caller)
            .iter()
            .flat_map(|s| s.targets.iter().cloned())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Targets that must be reanalyzed when `callee`'s model changes
    pub fn callers_of(&self, callee: &Target) -> Vec<Target> {
        let mut out: Vec<Target> = self
            .reverse
            .get(callee)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}

/// Collect every call expression in a statement block, inner calls first
fn collect_calls(statements: &[Stmt], f: &mut impl FnMut(&Expr, Span)) {
    for stmt in statements {
        match stmt {
            Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {
                // Nested defines are separate targets.
            }
            Stmt::Assign { targets, value, .. } => {
                for target in targets {
                    collect_calls_expr(target, f);
                }
                if let Some(value) = value {
                    collect_calls_expr(value, f);
                }
            }
            Stmt::AugAssign { target, value, .. } => {
                collect_calls_expr(target, f);
                collect_calls_expr(value, f);
            }
            Stmt::Return { value, .. } | Stmt::Raise { exception: value, .. } => {
                if let Some(value) = value {
                    collect_calls_expr(value, f);
                }
            }
            Stmt::Expr { value, .. } => collect_calls_expr(value, f),
            Stmt::If {
                test, body, orelse, ..
            }
            | Stmt::While {
                test, body, orelse, ..
            } => {
                collect_calls_expr(test, f);
                collect_calls(body, f);
                collect_calls(orelse, f);
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => {
                collect_calls_expr(target, f);
                collect_calls_expr(iter, f);
                collect_calls(body, f);
                collect_calls(orelse, f);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            } => {
                collect_calls(body, f);
                for handler in handlers {
                    if let Some(exception) = &handler.exception {
                        collect_calls_expr(exception, f);
                    }
                    collect_calls(&handler.body, f);
                }
                collect_calls(orelse, f);
                collect_calls(finalbody, f);
            }
            Stmt::With { items, body, .. } => {
                for (expr, _) in items {
                    collect_calls_expr(expr, f);
                }
                collect_calls(body, f);
            }
            Stmt::Assert { test, message, .. } => {
                collect_calls_expr(test, f);
                if let Some(message) = message {
                    collect_calls_expr(message, f);
                }
            }
            Stmt::Delete { targets, .. } => {
                for target in targets {
                    collect_calls_expr(target, f);
                }
            }
            Stmt::Import { .. }
            | Stmt::ImportFrom { .. }
            | Stmt::Global { .. }
            | Stmt::Pass { .. }
            | Stmt::Break { .. }
            | Stmt::Continue { .. } => {}
        }
    }
}

fn collect_calls_expr(expr: &Expr, f: &mut impl FnMut(&Expr, Span)) {
    match expr {
        Expr::Call {
            func,
            args,
            keywords,
            span,
        } => {
            collect_calls_expr(func, f);
            for arg in args {
                collect_calls_expr(arg, f);
            }
            for (_, value) in keywords {
                collect_calls_expr(value, f);
            }
            f(expr, *span);
        }
        Expr::Attribute { value, .. } => collect_calls_expr(value, f),
        Expr::Subscript { value, index, .. } => {
            collect_calls_expr(value, f);
            collect_calls_expr(index, f);
        }
        Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
            for elt in elts {
                collect_calls_expr(elt, f);
            }
        }
        Expr::Dict { keys, values, .. } => {
            for key in keys.iter().flatten() {
                collect_calls_expr(key, f);
            }
            for value in values {
                collect_calls_expr(value, f);
            }
        }
        Expr::BinOp { left, right, .. } => {
            collect_calls_expr(left, f);
            collect_calls_expr(right, f);
        }
        Expr::BoolOp { values, .. } => {
            for value in values {
                collect_calls_expr(value, f);
            }
        }
        Expr::UnaryOp { operand, .. } => collect_calls_expr(operand, f),
        Expr::Compare {
            left, comparators, ..
        } => {
            collect_calls_expr(left, f);
            for comparator in comparators {
                collect_calls_expr(comparator, f);
            }
        }
        Expr::Await { value, .. } | Expr::Starred { value, .. } => collect_calls_expr(value, f),
        Expr::Lambda { body, .. } => collect_calls_expr(body, f),
        Expr::FString { parts, .. } => {
            for part in parts {
                collect_calls_expr(part, f);
            }
        }
        Expr::Ternary {
            test, body, orelse, ..
        } => {
            collect_calls_expr(test, f);
            collect_calls_expr(body, f);
            collect_calls_expr(orelse, f);
        }
        Expr::Name { .. } | Expr::Constant { .. } | Expr::Unknown { .. } => {}
    }
}

/// Resolves one call expression to its target set
struct CallResolver<'a> {
    env: &'a TypeEnvironment,
    index: &'a DefineIndex,
    overrides: &'a OverrideGraph,
    define: &'a Define,
    processed: &'a ProcessedSource,

    /// Parameter name → class FQN, from annotations
    param_types: FxHashMap<String, String>,
}

impl<'a> CallResolver<'a> {
    fn new(
        env: &'a TypeEnvironment,
        index: &'a DefineIndex,
        overrides: &'a OverrideGraph,
        define: &'a Define,
        processed: &'a ProcessedSource,
    ) -> Self {
        let mut param_types = FxHashMap::default();
        for param in &define.def.params {
            if let Some(annotation) = &param.annotation {
                if let ScalarType::Instance(class) =
                    env.scalar_from_annotation(annotation, processed)
                {
                    param_types.insert(param.name.clone(), class);
                }
            }
        }
        Self {
            env,
            index,
            overrides,
            define,
            processed,
            param_types,
        }
    }

    fn resolve(&self, call: &Expr) -> Vec<Target> {
        let Expr::Call { func, .. } = call else {
            return Vec::new();
        };

        // Dynamic dispatch through `self` or an annotated parameter.
        if let Expr::Attribute { value, attr, .. } = func.as_ref() {
            if let Expr::Name { id, .. } = value.as_ref() {
                let receiver_class = if id == "self" {
                    self.define.class.clone()
                } else {
                    self.param_types.get(id).cloned()
                };
                if let Some(class) = receiver_class {
                    if let Some(resolved) = self.resolve_method(&class, attr) {
                        return resolved;
                    }
                }
            }
        }

        let Some(dotted) = func.as_dotted_name() else {
            return Vec::new();
        };
        let qualified = self.processed.qualify(&dotted);
        let resolved = self.env.resolve_aliases(&qualified);

        // A plain function in the environment.
        let function = Target::function(resolved.clone());
        if self.index.contains(&function) {
            return vec![function];
        }

        // A class name: the call constructs an instance.
        if self.env.class_summary(&resolved).is_some() {
            let init = Target::method(resolved.clone(), "__init__");
            if self.index.contains(&init) {
                return vec![init];
            }
            return vec![Target::function(resolved)];
        }

        // An explicit `Class.method` reference: static dispatch.
        if let Some((class, method)) = resolved.rsplit_once('.') {
            let target = Target::method(class.to_string(), method.to_string());
            if self.index.contains(&target) {
                return vec![target];
            }
        }

        // Opaque external callable; models may still attach to the name.
        vec![Target::function(resolved)]
    }

    fn resolve_method(&self, class: &str, attr: &str) -> Option<Vec<Target>> {
        let info = self.env.resolve_attribute(class, attr)?;
        if !info.is_method {
            return None;
        }
        let declaring = info.declaring_class.clone();
        if self.overrides.has_overrides(&declaring, attr) {
            Some(vec![Target::Override {
                class: declaring,
                name: attr.to_string(),
                kind: crate::shared::models::TargetKind::Normal,
            }])
        } else {
            Some(vec![Target::method(declaring, attr.to_string())])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::dependency::DependencyTracker;
    use crate::features::source_env::SourceEnvironment;
    use crate::shared::models::SearchRoot;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn build(files: &[(&str, &str)]) -> (TypeEnvironment, DefineIndex, OverrideGraph, CallGraph) {
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
        let env = TypeEnvironment::new(source);
        let index = DefineIndex::build(&env);
        let overrides = OverrideGraph::build(&env, &index);
        let graph = CallGraph::build(&env, &index, &overrides);
        (env, index, overrides, graph)
    }

    #[test]
    fn test_direct_function_call_edge() {
        let (_, _, _, graph) = build(&[(
            "m.py",
            "def callee():\n    pass\n\ndef caller():\n    callee()\n",
        )]);

        let callees = graph.callees_of(&Target::function("m.caller"));
        assert_eq!(callees, vec![Target::function("m.callee")]);
        let callers = graph.callers_of(&Target::function("m.callee"));
        assert_eq!(callers, vec![Target::function("m.caller")]);
    }

    #[test]
    fn test_unknown_callee_is_opaque_function() {
        let (_, _, _, graph) = build(&[(
            "m.py",
            "import os\ndef f(cmd):\n    os.system(cmd)\n",
        )]);

        let callees = graph.callees_of(&Target::function("m.f"));
        assert_eq!(callees, vec![Target::function("os.system")]);
    }

    #[test]
    fn test_self_dispatch_resolves_override_target() {
        let (_, _, _, graph) = build(&[(
            "m.py",
            "class Base:\n    def run(self):\n        self.step()\n    def step(self):\n        pass\n\nclass Derived(Base):\n    def step(self):\n        pass\n",
        )]);

        let callees = graph.callees_of(&Target::method("m.Base", "run"));
        assert_eq!(
            callees,
            vec![Target::method("m.Base", "step").as_override().unwrap()]
        );
    }

    #[test]
    fn test_override_target_depends_on_all_members() {
        let (_, _, _, graph) = build(&[(
            "m.py",
            "class Base:\n    def step(self):\n        pass\n\nclass Derived(Base):\n    def step(self):\n        pass\n\ndef drive(b: Base):\n    b.step()\n",
        )]);

        let override_target = Target::method("m.Base", "step").as_override().unwrap();

        // The driver reanalyzes the override target when either member
        // method's model moves.
        assert!(graph
            .callers_of(&Target::method("m.Base", "step"))
            .contains(&override_target));
        assert!(graph
            .callers_of(&Target::method("m.Derived", "step"))
            .contains(&override_target));

        // And the annotated-parameter call dispatches to the override.
        let callees = graph.callees_of(&Target::function("m.drive"));
        assert_eq!(callees, vec![override_target]);
    }

    #[test]
    fn test_constructor_call() {
        let (_, _, _, graph) = build(&[(
            "m.py",
            "class C:\n    def __init__(self, x):\n        self.x = x\n\ndef make():\n    return C(1)\n",
        )]);

        let callees = graph.callees_of(&Target::function("m.make"));
        assert_eq!(callees, vec![Target::method("m.C", "__init__")]);
    }
}
