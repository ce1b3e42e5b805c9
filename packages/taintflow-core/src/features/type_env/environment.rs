//! The derived-table stack
//!
//! Each layer follows the same pattern: a `compute(key)` that issues
//! memoized sub-queries, automatic dependency registration on every
//! sub-query, and a uniform `update` that re-parses through the source
//! environment, drops exactly the triggered values, and reports the newly
//! triggered keys upward.

use super::check::check_source;
use super::domain::{AttributeInfo, ClassSummary, GlobalInfo, ScalarType, SigParam, Signature};
use crate::features::dependency::{DependencyId, DependencyKey, DependencyTracker, TableTag};
use crate::features::source_env::ast::{ClassDef, Expr, FunctionDef, Stmt};
use crate::features::source_env::{
    FileEvent, ProcessedSource, SourceEnvironment, UpdateResult,
};
use crate::features::source_env::preprocess::lift_decorators;
use crate::shared::models::{Diagnostic, Qualifier};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Result of pushing an update batch through the layer stack
#[derive(Debug, Default)]
pub struct EnvUpdateResult {
    pub invalidated_modules: Vec<Qualifier>,
    pub triggered_dependencies: FxHashSet<DependencyId>,
    pub syntax_errors: Vec<Diagnostic>,

    /// Modules whose diagnostic layer must re-run
    pub recheck_modules: Vec<Qualifier>,

    /// Callables whose call-graph edges were invalidated (consumed by the
    /// fixpoint layer above)
    pub stale_callables: Vec<String>,
}

#[derive(Default)]
struct TypeEnvState {
    /// Module-level `X = Y` alias bindings, by alias FQN
    aliases: FxHashMap<String, Option<String>>,

    class_summaries: FxHashMap<String, Option<Arc<ClassSummary>>>,

    /// (class FQN, attribute) → resolution
    attributes: FxHashMap<(String, String), Option<Arc<AttributeInfo>>>,

    globals: FxHashMap<String, Option<Arc<GlobalInfo>>>,

    checks: FxHashMap<Qualifier, Arc<Vec<Diagnostic>>>,

    /// Statement-shape fingerprint per module at last layer computation;
    /// lets a mode-only change skip the lower layers.
    shape_fingerprints: FxHashMap<Qualifier, blake3::Hash>,
}

/// Layered environment above the source environment
pub struct TypeEnvironment {
    source_env: Arc<SourceEnvironment>,
    tracker: Arc<DependencyTracker>,
    state: RwLock<TypeEnvState>,

    /// Hot signature lookups from model verification and the analyzers
    signature_cache: Mutex<LruCache<String, Option<Arc<Signature>>>>,
}

impl TypeEnvironment {
    pub fn new(source_env: Arc<SourceEnvironment>) -> Self {
        let tracker = Arc::clone(source_env.tracker());
        Self {
            source_env,
            tracker,
            state: RwLock::new(TypeEnvState::default()),
            signature_cache: Mutex::new(LruCache::new(NonZeroUsize::new(2048).unwrap())),
        }
    }

    pub fn source_env(&self) -> &Arc<SourceEnvironment> {
        &self.source_env
    }

    pub fn tracker(&self) -> &Arc<DependencyTracker> {
        &self.tracker
    }

    // ------------------------------------------------------------------
    // Name navigation
    // ------------------------------------------------------------------

    /// Split a fully qualified name into its module qualifier and the
    /// in-module component chain, preferring the longest module prefix.
    pub fn locate(&self, fqn: &str) -> Option<(Qualifier, Vec<String>)> {
        let components: Vec<&str> = fqn.split('.').collect();
        for prefix_len in (1..components.len()).rev() {
            let qualifier = Qualifier::new(components[..prefix_len].join("."));
            if self.source_env.module_path(&qualifier).is_some() {
                let rest = components[prefix_len..]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                return Some((qualifier, rest));
            }
        }
        None
    }

    fn find_in_statements<'a>(statements: &'a [Stmt], name: &str) -> Option<&'a Stmt> {
        statements.iter().find(|stmt| match stmt {
            Stmt::FunctionDef(def) => def.name == name,
            Stmt::ClassDef(def) => def.name == name,
            _ => false,
        })
    }

    /// Navigate nested classes down to the statement named by `chain`
    fn navigate<'a>(statements: &'a [Stmt], chain: &[String]) -> Option<&'a Stmt> {
        let (head, rest) = chain.split_first()?;
        let stmt = Self::find_in_statements(statements, head)?;
        if rest.is_empty() {
            return Some(stmt);
        }
        match stmt {
            Stmt::ClassDef(class) => Self::navigate(&class.body, rest),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Layer 1: alias resolver
    // ------------------------------------------------------------------

    /// Resolve a module-level `Alias = Target` binding to its target FQN
    pub fn alias_of(&self, fqn: &str) -> Option<String> {
        {
            let state = self.state.read();
            if let Some(cached) = state.aliases.get(fqn) {
                return cached.clone();
            }
        }

        let dep = self
            .tracker
            .register(DependencyKey::AliasRegister(fqn.to_string()));
        let computed = self.compute_alias(fqn, dep);

        self.state
            .write()
            .aliases
            .insert(fqn.to_string(), computed.clone());
        computed
    }

    fn compute_alias(&self, fqn: &str, dep: DependencyId) -> Option<String> {
        let (qualifier, chain) = self.locate(fqn)?;
        let processed = self.source_env.get(&qualifier, Some(dep))?;
        if chain.len() != 1 {
            return None;
        }
        for stmt in &processed.source.statements {
            let Stmt::Assign { targets, value: Some(value), annotation: None, .. } = stmt else {
                continue;
            };
            let binds = targets
                .iter()
                .any(|t| matches!(t, Expr::Name { id, .. } if *id == chain[0]));
            if !binds {
                continue;
            }
            if let Some(dotted) = value.as_dotted_name() {
                return Some(processed.qualify(&dotted));
            }
        }
        None
    }

    /// Follow alias links to a fixed point (cycles are cut off)
    pub fn resolve_aliases(&self, fqn: &str) -> String {
        let mut current = fqn.to_string();
        for _ in 0..8 {
            match self.alias_of(&current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current
    }

    // ------------------------------------------------------------------
    // Layer 2: class summaries
    // ------------------------------------------------------------------

    pub fn class_summary(&self, fqn: &str) -> Option<Arc<ClassSummary>> {
        {
            let state = self.state.read();
            if let Some(cached) = state.class_summaries.get(fqn) {
                return cached.clone();
            }
        }

        let dep = self
            .tracker
            .register(DependencyKey::ClassSummary(fqn.to_string()));
        let computed = self.compute_class_summary(fqn, dep);

        self.state
            .write()
            .class_summaries
            .insert(fqn.to_string(), computed.clone());
        computed
    }

    fn compute_class_summary(&self, fqn: &str, dep: DependencyId) -> Option<Arc<ClassSummary>> {
        let (qualifier, chain) = self.locate(fqn)?;
        let processed = self.source_env.get(&qualifier, Some(dep))?;
        let Stmt::ClassDef(class) = Self::navigate(&processed.source.statements, &chain)? else {
            return None;
        };

        let bases = class
            .bases
            .iter()
            .filter_map(|b| b.as_dotted_name())
            .map(|b| self.resolve_aliases(&processed.qualify(&b)))
            .collect();

        let mut methods = Vec::new();
        let mut attributes: Vec<(String, Option<ScalarType>)> = Vec::new();
        for stmt in &class.body {
            match stmt {
                Stmt::FunctionDef(def) => {
                    methods.push(self.signature_from_def(
                        format!("{fqn}.{}", def.name),
                        def,
                        &processed,
                    ));
                    if def.name == "__init__" {
                        collect_self_attributes(def, &processed, &mut attributes);
                    }
                }
                Stmt::Assign {
                    targets, annotation, ..
                } => {
                    for target in targets {
                        if let Expr::Name { id, .. } = target {
                            let ty = annotation
                                .as_ref()
                                .map(|a| self.scalar_from_annotation(a, &processed));
                            attributes.push((id.clone(), ty));
                        }
                    }
                }
                _ => {}
            }
        }

        Some(Arc::new(ClassSummary {
            name: fqn.to_string(),
            bases,
            methods,
            attributes,
            span: class.span,
        }))
    }

    // ------------------------------------------------------------------
    // Layer 3: attribute resolver
    // ------------------------------------------------------------------

    /// Resolve `class.attr`, walking base classes depth-first in
    /// declaration order.
    pub fn resolve_attribute(&self, class: &str, attr: &str) -> Option<Arc<AttributeInfo>> {
        let key = (class.to_string(), attr.to_string());
        {
            let state = self.state.read();
            if let Some(cached) = state.attributes.get(&key) {
                return cached.clone();
            }
        }

        let dep = self
            .tracker
            .register(DependencyKey::AttributeTable(class.to_string()));
        let computed = self.compute_attribute(class, attr, dep);

        self.state.write().attributes.insert(key, computed.clone());
        computed
    }

    fn compute_attribute(
        &self,
        class: &str,
        attr: &str,
        dep: DependencyId,
    ) -> Option<Arc<AttributeInfo>> {
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut stack = vec![class.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            // The attribute table reads each class summary it walks.
            self.tracker.read(TableTag::ClassSummary, &current, dep);
            let Some(summary) = self.class_summary(&current) else {
                continue;
            };
            if let Some(method) = summary.method(attr) {
                return Some(Arc::new(AttributeInfo {
                    declaring_class: current,
                    name: attr.to_string(),
                    annotation: Some(method.effective_return()),
                    is_method: !method.is_property,
                }));
            }
            if let Some((name, ty)) = summary.own_attribute(attr) {
                return Some(Arc::new(AttributeInfo {
                    declaring_class: current,
                    name: name.clone(),
                    annotation: ty.clone(),
                    is_method: false,
                }));
            }
            // Right-to-left push keeps left-to-right resolution order.
            for base in summary.bases.iter().rev() {
                stack.push(base.clone());
            }
        }
        None
    }

    /// All transitive subclasses recorded in the environment that
    /// re-declare `method_name` (used by the override graph)
    pub fn class_bases(&self, class: &str) -> Vec<String> {
        self.class_summary(class)
            .map(|s| s.bases.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Layer 4: annotated globals
    // ------------------------------------------------------------------

    pub fn global_info(&self, fqn: &str) -> Option<Arc<GlobalInfo>> {
        {
            let state = self.state.read();
            if let Some(cached) = state.globals.get(fqn) {
                return cached.clone();
            }
        }

        let dep = self
            .tracker
            .register(DependencyKey::AnnotatedGlobal(fqn.to_string()));
        let computed = self.compute_global(fqn, dep);

        self.state
            .write()
            .globals
            .insert(fqn.to_string(), computed.clone());
        computed
    }

    fn compute_global(&self, fqn: &str, dep: DependencyId) -> Option<Arc<GlobalInfo>> {
        let (qualifier, chain) = self.locate(fqn)?;
        if chain.len() != 1 {
            return None;
        }
        let processed = self.source_env.get(&qualifier, Some(dep))?;
        for stmt in &processed.source.statements {
            let Stmt::Assign {
                targets,
                annotation,
                span,
                ..
            } = stmt
            else {
                continue;
            };
            let binds = targets
                .iter()
                .any(|t| matches!(t, Expr::Name { id, .. } if *id == chain[0]));
            if binds {
                return Some(Arc::new(GlobalInfo {
                    name: fqn.to_string(),
                    annotation: annotation
                        .as_ref()
                        .map(|a| self.scalar_from_annotation(a, &processed)),
                    span: *span,
                }));
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Signatures (hot path for model verification and the analyzers)
    // ------------------------------------------------------------------

    pub fn signature_of(&self, fqn: &str) -> Option<Arc<Signature>> {
        if let Some(cached) = self.signature_cache.lock().get(fqn) {
            return cached.clone();
        }
        let computed = self.compute_signature(fqn);
        self.signature_cache
            .lock()
            .put(fqn.to_string(), computed.clone());
        computed
    }

    fn compute_signature(&self, fqn: &str) -> Option<Arc<Signature>> {
        let resolved = self.resolve_aliases(fqn);
        let (qualifier, chain) = self.locate(&resolved)?;
        let processed = self.source_env.get(&qualifier, None)?;
        match Self::navigate(&processed.source.statements, &chain)? {
            Stmt::FunctionDef(def) => Some(Arc::new(self.signature_from_def(
                resolved.clone(),
                def,
                &processed,
            ))),
            Stmt::ClassDef(class) => {
                // Calling a class resolves to its constructor.
                let init = class.body.iter().find_map(|s| match s {
                    Stmt::FunctionDef(def) if def.name == "__init__" => Some(def),
                    _ => None,
                })?;
                Some(Arc::new(self.signature_from_def(
                    format!("{resolved}.__init__"),
                    init,
                    &processed,
                )))
            }
            _ => None,
        }
    }

    fn signature_from_def(
        &self,
        fqn: String,
        def: &FunctionDef,
        processed: &ProcessedSource,
    ) -> Signature {
        let behavior = lift_decorators(def);
        let params = def
            .params
            .iter()
            .map(|p| SigParam {
                name: p.name.clone(),
                annotation: p
                    .annotation
                    .as_ref()
                    .map(|a| self.scalar_from_annotation(a, processed)),
                has_default: p.default.is_some(),
                kind: p.kind,
            })
            .collect();

        Signature {
            name: fqn,
            params,
            returns: def
                .returns
                .as_ref()
                .map(|r| self.scalar_from_annotation(r, processed)),
            is_async: def.is_async,
            is_property: behavior.is_property,
            is_setter: behavior.is_setter,
            is_staticmethod: behavior.is_staticmethod,
            is_classmethod: behavior.is_classmethod,
            unrecognized_decorators: behavior.unrecognized,
            span: def.span,
        }
    }

    /// Approximate interpretation of an annotation expression
    pub fn scalar_from_annotation(
        &self,
        annotation: &Expr,
        processed: &ProcessedSource,
    ) -> ScalarType {
        match annotation {
            Expr::Constant {
                value: crate::features::source_env::ast::Constant::None,
                ..
            } => ScalarType::Primitive("None".to_string()),
            Expr::Subscript { value, index, .. } => {
                let head = value
                    .as_dotted_name()
                    .map(|d| processed.qualify(&d))
                    .unwrap_or_default();
                match head.as_str() {
                    "Optional" | "typing.Optional" => ScalarType::Optional(Box::new(
                        self.scalar_from_annotation(index, processed),
                    )),
                    "Awaitable" | "typing.Awaitable" => ScalarType::Awaitable(Box::new(
                        self.scalar_from_annotation(index, processed),
                    )),
                    _ => match value.as_dotted_name() {
                        Some(dotted) => {
                            let resolved =
                                self.resolve_aliases(&processed.qualify(&dotted));
                            ScalarType::from_annotation(&resolved)
                        }
                        None => ScalarType::Any,
                    },
                }
            }
            other => match other.as_dotted_name() {
                Some(dotted) => {
                    let qualified = processed.qualify(&dotted);
                    let resolved = self.resolve_aliases(&qualified);
                    // Builtin names never qualify to a module.
                    if qualified == dotted {
                        ScalarType::from_annotation(&dotted)
                    } else {
                        ScalarType::from_annotation(&resolved)
                    }
                }
                None => ScalarType::Any,
            },
        }
    }

    // ------------------------------------------------------------------
    // Layer 5: type check
    // ------------------------------------------------------------------

    /// Diagnostics for one module, memoized
    pub fn check_module(&self, qualifier: &Qualifier) -> Arc<Vec<Diagnostic>> {
        {
            let state = self.state.read();
            if let Some(cached) = state.checks.get(qualifier) {
                return Arc::clone(cached);
            }
        }

        let dep = self
            .tracker
            .register(DependencyKey::TypeCheckDefine(qualifier.clone()));
        let diagnostics = match self.source_env.get(qualifier, Some(dep)) {
            Some(processed) => {
                let path = self
                    .source_env
                    .source_path(qualifier)
                    .unwrap_or_else(|| qualifier.as_str().into());
                let fingerprint = processed.source.semantic_fingerprint();
                self.state
                    .write()
                    .shape_fingerprints
                    .insert(qualifier.clone(), fingerprint);
                check_source(&processed, &path, self)
            }
            None => Vec::new(),
        };

        let diagnostics = Arc::new(diagnostics);
        self.state
            .write()
            .checks
            .insert(qualifier.clone(), Arc::clone(&diagnostics));
        diagnostics
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Push a batch of file events through every layer.
    ///
    /// A module whose statement shape is unchanged (a mode flip, say) keeps
    /// its alias/class/global caches; only the diagnostic layer re-runs.
    pub fn update(&self, events: Vec<FileEvent>) -> EnvUpdateResult {
        let source: UpdateResult = self.source_env.update(events);
        let mut result = EnvUpdateResult {
            syntax_errors: source.syntax_errors,
            triggered_dependencies: source.triggered_dependencies.clone(),
            ..EnvUpdateResult::default()
        };

        let mut recheck: FxHashSet<Qualifier> = FxHashSet::default();
        let mut shape_unchanged_modules: FxHashSet<Qualifier> = FxHashSet::default();

        // Per-module invalidation, shape-aware.
        for qualifier in &source.invalidated_modules {
            let old_shape = self.state.read().shape_fingerprints.get(qualifier).copied();
            let new_shape = self
                .source_env
                .get(qualifier, None)
                .map(|p| p.source.semantic_fingerprint());

            let shape_unchanged = matches!((old_shape, &new_shape), (Some(old), Some(new)) if old == *new);
            let mut state = self.state.write();
            state.checks.remove(qualifier);
            recheck.insert(qualifier.clone());
            if shape_unchanged {
                debug!(%qualifier, "shape unchanged; lower layers kept");
                shape_unchanged_modules.insert(qualifier.clone());
                continue;
            }
            let prefix = format!("{}.", qualifier.as_str());
            state.aliases.retain(|k, _| !k.starts_with(&prefix));
            state.class_summaries.retain(|k, _| !k.starts_with(&prefix));
            state
                .attributes
                .retain(|(class, _), _| !class.starts_with(&prefix));
            state.globals.retain(|k, _| !k.starts_with(&prefix));
            match new_shape {
                Some(fp) => {
                    state.shape_fingerprints.insert(qualifier.clone(), fp);
                }
                None => {
                    state.shape_fingerprints.remove(qualifier);
                }
            }
        }

        // A derived entry belongs to a shape-unchanged module when its name
        // sits under that module's qualifier; such entries stay valid.
        let kept = |name: &str| {
            shape_unchanged_modules.iter().any(|q| {
                name.strip_prefix(q.as_str())
                    .map(|rest| rest.starts_with('.'))
                    .unwrap_or(false)
            })
        };

        // Transitive trigger propagation through the derived tables.
        let mut queue: Vec<DependencyId> =
            source.triggered_dependencies.iter().copied().collect();
        let mut seen: FxHashSet<DependencyId> = queue.iter().copied().collect();
        while let Some(id) = queue.pop() {
            let Some(key) = self.tracker.resolve(id) else {
                continue;
            };
            let newly = match key {
                DependencyKey::TypeCheckDefine(q) => {
                    self.state.write().checks.remove(&q);
                    recheck.insert(q.clone());
                    self.tracker.invalidate(TableTag::TypeCheck, [q.as_str()])
                }
                DependencyKey::WildcardImport(_) => FxHashSet::default(),
                DependencyKey::AliasRegister(name) if !kept(&name) => {
                    self.state.write().aliases.remove(&name);
                    self.tracker.invalidate(TableTag::Alias, [name.as_str()])
                }
                DependencyKey::ClassSummary(name) if !kept(&name) => {
                    self.state.write().class_summaries.remove(&name);
                    self.tracker
                        .invalidate(TableTag::ClassSummary, [name.as_str()])
                }
                DependencyKey::AttributeTable(class) if !kept(&class) => {
                    self.state
                        .write()
                        .attributes
                        .retain(|(c, _), _| c != &class);
                    self.tracker
                        .invalidate(TableTag::AttributeTable, [class.as_str()])
                }
                DependencyKey::AnnotatedGlobal(name) if !kept(&name) => {
                    self.state.write().globals.remove(&name);
                    self.tracker
                        .invalidate(TableTag::AnnotatedGlobal, [name.as_str()])
                }
                DependencyKey::CallGraphOf(target) => {
                    result.stale_callables.push(target);
                    FxHashSet::default()
                }
                // Shape-unchanged module: the derived value is still valid.
                DependencyKey::AliasRegister(_)
                | DependencyKey::ClassSummary(_)
                | DependencyKey::AttributeTable(_)
                | DependencyKey::AnnotatedGlobal(_) => FxHashSet::default(),
            };
            result.triggered_dependencies.extend(newly.iter().copied());
            for next in newly {
                if seen.insert(next) {
                    queue.push(next);
                }
            }
        }

        // Signatures derive from everything below; drop them wholesale.
        self.signature_cache.lock().clear();

        result.invalidated_modules = source.invalidated_modules;
        result.recheck_modules = recheck.into_iter().collect();
        result.recheck_modules.sort();
        result.stale_callables.sort();
        result.stale_callables.dedup();
        result
    }
}

/// Collect `self.x = ...` attribute bindings from `__init__`
fn collect_self_attributes(
    def: &FunctionDef,
    _processed: &ProcessedSource,
    out: &mut Vec<(String, Option<ScalarType>)>,
) {
    fn walk(statements: &[Stmt], out: &mut Vec<(String, Option<ScalarType>)>) {
        for stmt in statements {
            match stmt {
                Stmt::Assign { targets, .. } => {
                    for target in targets {
                        if let Expr::Attribute { value, attr, .. } = target {
                            if matches!(value.as_ref(), Expr::Name { id, .. } if id == "self")
                                && !out.iter().any(|(n, _)| n == attr)
                            {
                                out.push((attr.clone(), None));
                            }
                        }
                    }
                }
                Stmt::If { body, orelse, .. } | Stmt::While { body, orelse, .. } => {
                    walk(body, out);
                    walk(orelse, out);
                }
                Stmt::For { body, orelse, .. } => {
                    walk(body, out);
                    walk(orelse, out);
                }
                Stmt::Try {
                    body,
                    handlers,
                    orelse,
                    finalbody,
                    ..
                } => {
                    walk(body, out);
                    for handler in handlers {
                        walk(&handler.body, out);
                    }
                    walk(orelse, out);
                    walk(finalbody, out);
                }
                Stmt::With { body, .. } => walk(body, out),
                _ => {}
            }
        }
    }
    walk(&def.body, out);
}
