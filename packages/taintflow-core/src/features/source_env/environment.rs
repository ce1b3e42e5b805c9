//! Parsed-source cache with incremental update
//!
//! Modules are discovered from `(path, content)` pairs against an ordered
//! search path, parsed on demand, and preprocessed lazily. `update` applies
//! a batch of file events: the full set of triggered dependency keys is
//! computed before any recomputation, so dependents of the batch never
//! observe a half-invalidated state.

use super::ast::ParsedSource;
use super::parser::{parse_module, ParseResult};
use super::preprocess::{compute_exports, preprocess, ExportSet, ProcessedSource};
use crate::features::dependency::{DependencyId, DependencyKey, DependencyTracker, TableTag};
use crate::shared::models::{Diagnostic, DiagnosticCode, ModulePath, Qualifier, SearchRoot};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One filesystem event fed into `update`
#[derive(Debug, Clone)]
pub enum FileEvent {
    CreatedOrChanged { path: PathBuf, content: String },
    Deleted { path: PathBuf },

    /// Something happened to the path but the watcher could not tell what;
    /// treated as a conservative change of the stored content.
    Unknown { path: PathBuf },
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::CreatedOrChanged { path, .. }
            | FileEvent::Deleted { path }
            | FileEvent::Unknown { path } => path,
        }
    }
}

/// Outcome of one update batch
#[derive(Debug, Default)]
pub struct UpdateResult {
    pub invalidated_modules: Vec<Qualifier>,
    pub triggered_dependencies: FxHashSet<DependencyId>,
    pub syntax_errors: Vec<Diagnostic>,
}

#[derive(Default)]
struct EnvState {
    /// All file contents, keyed by the path as given
    contents: FxHashMap<PathBuf, String>,

    /// Every module candidate per qualifier; the winner is the minimum
    /// under the shadowing order
    candidates: FxHashMap<Qualifier, Vec<(PathBuf, ModulePath)>>,

    raw: FxHashMap<Qualifier, Arc<ParseResult>>,
    processed: FxHashMap<Qualifier, Arc<ProcessedSource>>,

    /// Content fingerprint of the last parse per qualifier
    fingerprints: FxHashMap<Qualifier, blake3::Hash>,

    /// Export set observed at the last parse per qualifier
    exports: FxHashMap<Qualifier, ExportSet>,

    /// imported-qualifier → modules whose preprocessing expanded `import *`
    /// against it
    wildcard_importers: FxHashMap<Qualifier, FxHashSet<Qualifier>>,
}

/// The source environment: search path, contents, parse caches
pub struct SourceEnvironment {
    roots: Vec<SearchRoot>,
    tracker: Arc<DependencyTracker>,
    state: RwLock<EnvState>,
}

impl SourceEnvironment {
    pub fn new(roots: Vec<SearchRoot>, tracker: Arc<DependencyTracker>) -> Self {
        Self {
            roots,
            tracker,
            state: RwLock::new(EnvState::default()),
        }
    }

    pub fn tracker(&self) -> &Arc<DependencyTracker> {
        &self.tracker
    }

    /// Seed the environment with initial sources; no invalidation happens.
    pub fn add_sources(&self, sources: impl IntoIterator<Item = (PathBuf, String)>) {
        let mut state = self.state.write();
        for (path, content) in sources {
            if let Some((qualifier, module)) = self.resolve_path(&path) {
                state
                    .candidates
                    .entry(qualifier)
                    .or_default()
                    .push((path.clone(), module));
            }
            state.contents.insert(path, content);
        }
    }

    fn resolve_path(&self, path: &Path) -> Option<(Qualifier, ModulePath)> {
        // Longest matching root wins so nested roots behave predictably.
        let mut best: Option<(&SearchRoot, &Path)> = None;
        for root in &self.roots {
            if let Ok(relative) = path.strip_prefix(&root.path) {
                let better = match best {
                    Some((current, _)) => {
                        root.path.as_os_str().len() > current.path.as_os_str().len()
                    }
                    None => true,
                };
                if better {
                    best = Some((root, relative));
                }
            }
        }
        let (root, relative) = best?;
        let module = ModulePath::from_relative(relative, root)?;
        Some((module.qualifier.clone(), module))
    }

    /// The winning module identity for a qualifier
    pub fn module_path(&self, qualifier: &Qualifier) -> Option<ModulePath> {
        let state = self.state.read();
        Self::winner(&state, qualifier).map(|(_, m)| m.clone())
    }

    /// Path of the winning module file (for diagnostics)
    pub fn source_path(&self, qualifier: &Qualifier) -> Option<PathBuf> {
        let state = self.state.read();
        Self::winner(&state, qualifier).map(|(p, _)| p.clone())
    }

    fn winner<'a>(
        state: &'a EnvState,
        qualifier: &Qualifier,
    ) -> Option<(&'a PathBuf, &'a ModulePath)> {
        state
            .candidates
            .get(qualifier)?
            .iter()
            .min_by(|(_, a), (_, b)| {
                if a.shadows(b) {
                    std::cmp::Ordering::Less
                } else if b.shadows(a) {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .map(|(p, m)| (p, m))
    }

    /// All known qualifiers, sorted
    pub fn qualifiers(&self) -> Vec<Qualifier> {
        let state = self.state.read();
        let mut out: Vec<Qualifier> = state
            .candidates
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(q, _)| q.clone())
            .collect();
        out.sort();
        out
    }

    /// Un-preprocessed parse of a module, parsing on demand
    pub fn get_raw(&self, qualifier: &Qualifier) -> Option<Arc<ParseResult>> {
        {
            let state = self.state.read();
            if let Some(cached) = state.raw.get(qualifier) {
                return Some(Arc::clone(cached));
            }
        }

        let content = {
            let state = self.state.read();
            let (path, _) = Self::winner(&state, qualifier)?;
            state.contents.get(path)?.clone()
        };

        let result = Arc::new(parse_module(qualifier.clone(), &content));
        let fingerprint = blake3::hash(content.as_bytes());
        let exports = result
            .source()
            .map(compute_exports)
            .unwrap_or_default();

        let mut state = self.state.write();
        state.fingerprints.insert(qualifier.clone(), fingerprint);
        state.exports.insert(qualifier.clone(), exports);
        Some(Arc::clone(
            state
                .raw
                .entry(qualifier.clone())
                .or_insert_with(|| result),
        ))
    }

    /// Export set of a module, used by wildcard expansion. Failed parses
    /// have no enumerable exports.
    fn raw_exports(&self, qualifier: &Qualifier) -> Option<ExportSet> {
        let raw = self.get_raw(qualifier)?;
        raw.source().map(compute_exports)
    }

    /// Preprocessed module. Parses on demand and, when `dependency` is
    /// given, records the read for later invalidation.
    pub fn get(
        &self,
        qualifier: &Qualifier,
        dependency: Option<DependencyId>,
    ) -> Option<Arc<ProcessedSource>> {
        if let Some(dep) = dependency {
            self.tracker
                .read(TableTag::ProcessedSource, qualifier.as_str(), dep);
        }
        {
            let state = self.state.read();
            if let Some(cached) = state.processed.get(qualifier) {
                return Some(Arc::clone(cached));
            }
        }

        let parsed = self.parsed_or_stub(qualifier)?;
        let wildcard_reader = self
            .tracker
            .register(DependencyKey::WildcardImport(qualifier.clone()));

        let processed = preprocess(parsed, &mut |imported| {
            // The expansion reads the imported module's raw exports; record
            // it both ways so an update at the imported module can find us.
            self.tracker
                .read(TableTag::RawSource, imported.as_str(), wildcard_reader);
            self.state
                .write()
                .wildcard_importers
                .entry(imported.clone())
                .or_default()
                .insert(qualifier.clone());
            self.raw_exports(imported)
        });

        let processed = Arc::new(processed);
        let mut state = self.state.write();
        Some(Arc::clone(
            state
                .processed
                .entry(qualifier.clone())
                .or_insert_with(|| processed),
        ))
    }

    fn parsed_or_stub(&self, qualifier: &Qualifier) -> Option<ParsedSource> {
        let raw = self.get_raw(qualifier)?;
        Some(match raw.as_ref() {
            ParseResult::Source(source) => source.clone(),
            ParseResult::Failure(_) => ParsedSource::any_getattr_stub(qualifier.clone()),
        })
    }

    /// Apply a batch of file events.
    ///
    /// The triggered-dependency set is assembled for the whole batch before
    /// any cache entry is recomputed. A changed module triggers
    /// `WildcardImport(q)` unless its externally visible names provably did
    /// not change.
    pub fn update(&self, events: Vec<FileEvent>) -> UpdateResult {
        let mut result = UpdateResult::default();
        let mut affected: FxHashSet<Qualifier> = FxHashSet::default();

        {
            let mut state = self.state.write();
            for event in &events {
                let path = event.path().to_path_buf();
                match event {
                    FileEvent::CreatedOrChanged { content, .. } => {
                        state.contents.insert(path.clone(), content.clone());
                        if let Some((qualifier, module)) = self.resolve_path(&path) {
                            let slot = state.candidates.entry(qualifier.clone()).or_default();
                            if !slot.iter().any(|(p, _)| p == &path) {
                                slot.push((path.clone(), module));
                            }
                            affected.insert(qualifier);
                        }
                    }
                    FileEvent::Deleted { .. } => {
                        state.contents.remove(&path);
                        if let Some((qualifier, _)) = self.resolve_path(&path) {
                            if let Some(slot) = state.candidates.get_mut(&qualifier) {
                                slot.retain(|(p, _)| p != &path);
                            }
                            affected.insert(qualifier);
                        }
                    }
                    FileEvent::Unknown { .. } => {
                        if let Some((qualifier, _)) = self.resolve_path(&path) {
                            affected.insert(qualifier);
                        }
                    }
                }
            }
        }

        // Re-parse affected modules up front to decide whether their export
        // surface changed; this also surfaces syntax errors for the batch.
        let mut exports_changed: FxHashSet<Qualifier> = FxHashSet::default();
        for qualifier in &affected {
            let old_exports = self.state.read().exports.get(qualifier).cloned();
            let (new_result, new_exports) = {
                let state = self.state.read();
                match Self::winner(&state, qualifier) {
                    Some((path, _)) => {
                        let content = state.contents.get(path).cloned().unwrap_or_default();
                        let parsed = parse_module(qualifier.clone(), &content);
                        let exports = parsed.source().map(compute_exports);
                        (Some((parsed, path.clone())), exports)
                    }
                    None => (None, None),
                }
            };

            match (&old_exports, &new_exports) {
                (Some(old), Some(new)) if old == new => {
                    debug!(%qualifier, "exports unchanged; wildcard dependents kept");
                }
                _ => {
                    exports_changed.insert(qualifier.clone());
                }
            }

            if let Some((ParseResult::Failure(failure), path)) = &new_result {
                result.syntax_errors.push(Diagnostic::error(
                    DiagnosticCode::PARSE_ERROR,
                    path.clone(),
                    failure.span,
                    failure.message.clone(),
                ));
            }
        }

        // Wildcard importers of an affected module are invalidated with it.
        let mut invalidated: FxHashSet<Qualifier> = affected.clone();
        {
            let state = self.state.read();
            for qualifier in &affected {
                if !exports_changed.contains(qualifier) {
                    continue;
                }
                if let Some(importers) = state.wildcard_importers.get(qualifier) {
                    invalidated.extend(importers.iter().cloned());
                }
            }
        }

        // Assemble the full trigger set before touching any cache.
        for qualifier in &affected {
            if exports_changed.contains(qualifier) {
                result.triggered_dependencies.insert(
                    self.tracker
                        .register(DependencyKey::WildcardImport(qualifier.clone())),
                );
            }
        }
        let invalidated_keys: Vec<String> =
            invalidated.iter().map(|q| q.as_str().to_string()).collect();
        result.triggered_dependencies.extend(self.tracker.invalidate(
            TableTag::RawSource,
            invalidated_keys.iter().map(|s| s.as_str()),
        ));
        result.triggered_dependencies.extend(self.tracker.invalidate(
            TableTag::ProcessedSource,
            invalidated_keys.iter().map(|s| s.as_str()),
        ));

        // Only now drop the stale cache entries.
        {
            let mut state = self.state.write();
            for qualifier in &invalidated {
                state.raw.remove(qualifier);
                state.processed.remove(qualifier);
                state.fingerprints.remove(qualifier);
                state.exports.remove(qualifier);
            }
        }

        result.invalidated_modules = invalidated.into_iter().collect();
        result.invalidated_modules.sort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::source_env::ast::Stmt;

    fn env_with(files: &[(&str, &str)]) -> SourceEnvironment {
        let tracker = Arc::new(DependencyTracker::new());
        let env = SourceEnvironment::new(vec![SearchRoot::new("/src", 0)], tracker);
        env.add_sources(
            files
                .iter()
                .map(|(p, c)| (PathBuf::from(format!("/src/{p}")), c.to_string())),
        );
        env
    }

    #[test]
    fn test_get_parses_on_demand() {
        let env = env_with(&[("a.py", "x = 1\n")]);
        let processed = env.get(&Qualifier::new("a"), None).unwrap();

        assert_eq!(processed.exports.names, vec!["x"]);
    }

    #[test]
    fn test_parse_failure_becomes_stub() {
        let env = env_with(&[("bad.py", "def f(:\n")]);
        let raw = env.get_raw(&Qualifier::new("bad")).unwrap();
        assert!(raw.failure().is_some());

        // The processed view substitutes the any-getattr stub.
        let processed = env.get(&Qualifier::new("bad"), None).unwrap();
        assert!(matches!(
            processed.source.statements[0],
            Stmt::FunctionDef(ref def) if def.name == "__getattr__"
        ));
    }

    #[test]
    fn test_update_triggers_wildcard_and_readers() {
        let env = env_with(&[("a.py", "x = 1\n"), ("b.py", "from a import *\n")]);
        let tracker = Arc::clone(env.tracker());

        // b reads a's exports during preprocessing.
        let b = env.get(&Qualifier::new("b"), None).unwrap();
        assert_eq!(b.import_aliases["x"], "a.x");

        // A reader of b's processed form.
        let reader = tracker.register(DependencyKey::TypeCheckDefine(Qualifier::new("b")));
        env.get(&Qualifier::new("b"), Some(reader));

        let result = env.update(vec![FileEvent::CreatedOrChanged {
            path: PathBuf::from("/src/a.py"),
            content: "x = 1\ny = 2\n".to_string(),
        }]);

        // Exports changed: the wildcard key fires and b is invalidated too.
        let wildcard = tracker.register(DependencyKey::WildcardImport(Qualifier::new("a")));
        assert!(result.triggered_dependencies.contains(&wildcard));
        assert!(result.triggered_dependencies.contains(&reader));
        assert!(result
            .invalidated_modules
            .contains(&Qualifier::new("b")));

        // Re-processing b sees the new export.
        let b = env.get(&Qualifier::new("b"), None).unwrap();
        assert_eq!(b.import_aliases["y"], "a.y");
    }

    #[test]
    fn test_unchanged_exports_keep_wildcard_dependents() {
        let env = env_with(&[("a.py", "x = 1\n"), ("b.py", "from a import *\n")]);
        env.get(&Qualifier::new("b"), None).unwrap();

        // Body change, same export surface.
        let result = env.update(vec![FileEvent::CreatedOrChanged {
            path: PathBuf::from("/src/a.py"),
            content: "x = 2\n".to_string(),
        }]);

        let wildcard = env
            .tracker()
            .register(DependencyKey::WildcardImport(Qualifier::new("a")));
        assert!(!result.triggered_dependencies.contains(&wildcard));
        assert!(!result.invalidated_modules.contains(&Qualifier::new("b")));
        assert!(result.invalidated_modules.contains(&Qualifier::new("a")));
    }

    #[test]
    fn test_update_reports_syntax_errors() {
        let env = env_with(&[("a.py", "x = 1\n")]);
        let result = env.update(vec![FileEvent::CreatedOrChanged {
            path: PathBuf::from("/src/a.py"),
            content: "def broken(:\n".to_string(),
        }]);

        assert_eq!(result.syntax_errors.len(), 1);
        assert_eq!(result.syntax_errors[0].code, DiagnosticCode::PARSE_ERROR);
    }

    #[test]
    fn test_stub_shadows_py_for_same_qualifier() {
        let tracker = Arc::new(DependencyTracker::new());
        let env = SourceEnvironment::new(
            vec![SearchRoot::new("/src", 0), SearchRoot::external("/stubs", 1)],
            tracker,
        );
        env.add_sources([
            (PathBuf::from("/src/m.py"), "x = 1\ny = 2\n".to_string()),
            (PathBuf::from("/stubs/m.pyi"), "x: int\n".to_string()),
        ]);

        let module = env.module_path(&Qualifier::new("m")).unwrap();
        assert!(module.is_stub);
    }

    #[test]
    fn test_deletion_removes_module() {
        let env = env_with(&[("a.py", "x = 1\n")]);
        env.get(&Qualifier::new("a"), None).unwrap();

        let result = env.update(vec![FileEvent::Deleted {
            path: PathBuf::from("/src/a.py"),
        }]);

        assert!(result.invalidated_modules.contains(&Qualifier::new("a")));
        assert!(env.get(&Qualifier::new("a"), None).is_none());
        assert!(env.module_path(&Qualifier::new("a")).is_none());
    }
}
