//! Overlay environment for editor scenarios
//!
//! An overlay layers in-memory contents over a parent environment. Queries
//! through the overlay see the overlaid modules; everything else falls
//! through to the parent untouched. Dependencies registered through the
//! overlay live in an overlay-local tracker, so an overlay update
//! invalidates only overlay consumers and the parent never observes
//! overlay state. Closing the overlay is dropping it.

use super::ast::ParsedSource;
use super::environment::{SourceEnvironment, UpdateResult};
use super::parser::{parse_module, ParseResult};
use super::preprocess::{compute_exports, preprocess, ExportSet, ProcessedSource};
use crate::features::dependency::{DependencyId, DependencyKey, DependencyTracker, TableTag};
use crate::shared::models::{Diagnostic, DiagnosticCode, Qualifier};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Default)]
struct OverlayState {
    /// In-memory contents keyed by qualifier
    contents: FxHashMap<Qualifier, String>,

    raw: FxHashMap<Qualifier, Arc<ParseResult>>,
    processed: FxHashMap<Qualifier, Arc<ProcessedSource>>,

    /// imported-qualifier → overlay consumers that expanded `import *`
    wildcard_importers: FxHashMap<Qualifier, FxHashSet<Qualifier>>,
}

/// Read-through layer over a parent [`SourceEnvironment`]
pub struct Overlay {
    parent: Arc<SourceEnvironment>,
    tracker: DependencyTracker,
    state: RwLock<OverlayState>,
}

impl Overlay {
    pub fn new(parent: Arc<SourceEnvironment>) -> Self {
        Self {
            parent,
            tracker: DependencyTracker::new(),
            state: RwLock::new(OverlayState::default()),
        }
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    /// Supply in-memory content for a set of paths.
    ///
    /// Invalidates only the overlay's local caches; the parent is never
    /// written to.
    pub fn update_overlaid_code(&self, code_updates: Vec<(PathBuf, String)>) -> UpdateResult {
        let mut result = UpdateResult::default();
        let mut affected: FxHashSet<Qualifier> = FxHashSet::default();

        for (path, content) in code_updates {
            // The parent's search path decides what qualifier a path has.
            let Some(qualifier) = self.qualifier_of(&path) else {
                continue;
            };
            let parsed = parse_module(qualifier.clone(), &content);
            if let ParseResult::Failure(failure) = &parsed {
                result.syntax_errors.push(Diagnostic::error(
                    DiagnosticCode::PARSE_ERROR,
                    path.clone(),
                    failure.span,
                    failure.message.clone(),
                ));
            }
            let mut state = self.state.write();
            state.contents.insert(qualifier.clone(), content);
            affected.insert(qualifier);
        }

        // Overlay consumers that expanded wildcards against an affected
        // module are invalidated with it.
        let mut invalidated = affected.clone();
        {
            let state = self.state.read();
            for qualifier in &affected {
                if let Some(importers) = state.wildcard_importers.get(qualifier) {
                    invalidated.extend(importers.iter().cloned());
                }
            }
        }

        for qualifier in &affected {
            result.triggered_dependencies.insert(
                self.tracker
                    .register(DependencyKey::WildcardImport(qualifier.clone())),
            );
        }
        let keys: Vec<String> = invalidated.iter().map(|q| q.as_str().to_string()).collect();
        result.triggered_dependencies.extend(
            self.tracker
                .invalidate(TableTag::RawSource, keys.iter().map(|s| s.as_str())),
        );
        result.triggered_dependencies.extend(
            self.tracker
                .invalidate(TableTag::ProcessedSource, keys.iter().map(|s| s.as_str())),
        );

        {
            let mut state = self.state.write();
            for qualifier in &invalidated {
                state.raw.remove(qualifier);
                state.processed.remove(qualifier);
            }
        }

        result.invalidated_modules = invalidated.into_iter().collect();
        result.invalidated_modules.sort();
        result
    }

    fn qualifier_of(&self, path: &PathBuf) -> Option<Qualifier> {
        // A module the parent already maps to this exact path; falling back
        // to the file stem only for paths the parent has never seen.
        if let Some(known) = self
            .parent
            .qualifiers()
            .into_iter()
            .find(|q| self.parent.source_path(q).as_deref() == Some(path.as_path()))
        {
            return Some(known);
        }
        let stem = path.file_stem()?.to_str()?.to_string();
        Some(Qualifier::new(stem))
    }

    /// Raw parse through the overlay
    pub fn get_raw(&self, qualifier: &Qualifier) -> Option<Arc<ParseResult>> {
        {
            let state = self.state.read();
            if let Some(cached) = state.raw.get(qualifier) {
                return Some(Arc::clone(cached));
            }
            if !state.contents.contains_key(qualifier) {
                drop(state);
                return self.parent.get_raw(qualifier);
            }
        }

        let content = self.state.read().contents.get(qualifier)?.clone();
        let parsed = Arc::new(parse_module(qualifier.clone(), &content));
        let mut state = self.state.write();
        Some(Arc::clone(
            state
                .raw
                .entry(qualifier.clone())
                .or_insert_with(|| parsed),
        ))
    }

    fn raw_exports(&self, qualifier: &Qualifier) -> Option<ExportSet> {
        let raw = self.get_raw(qualifier)?;
        raw.source().map(compute_exports)
    }

    /// Preprocessed module through the overlay's view.
    ///
    /// Always computed overlay-locally so that wildcard imports of overlaid
    /// modules resolve against the overlaid contents; dependencies register
    /// in the overlay tracker only.
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

        let parsed: ParsedSource = match self.get_raw(qualifier)?.as_ref() {
            ParseResult::Source(source) => source.clone(),
            ParseResult::Failure(_) => ParsedSource::any_getattr_stub(qualifier.clone()),
        };

        let wildcard_reader = self
            .tracker
            .register(DependencyKey::WildcardImport(qualifier.clone()));
        let processed = preprocess(parsed, &mut |imported| {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::SearchRoot;

    fn parent_with(files: &[(&str, &str)]) -> Arc<SourceEnvironment> {
        let tracker = Arc::new(DependencyTracker::new());
        let env = Arc::new(SourceEnvironment::new(
            vec![SearchRoot::new("/src", 0)],
            tracker,
        ));
        env.add_sources(
            files
                .iter()
                .map(|(p, c)| (PathBuf::from(format!("/src/{p}")), c.to_string())),
        );
        env
    }

    #[test]
    fn test_overlay_shadows_parent_content() {
        let parent = parent_with(&[("a.py", "x = 1\n"), ("b.py", "from a import *\n")]);
        let overlay = Overlay::new(Arc::clone(&parent));

        // Parent view first, so its cache is warm.
        let parent_b = parent.get(&Qualifier::new("b"), None).unwrap();
        assert_eq!(parent_b.import_aliases["x"], "a.x");

        overlay.update_overlaid_code(vec![(
            PathBuf::from("/src/a.py"),
            "x = 2\nz = 3\n".to_string(),
        )]);

        // The overlay sees the new export of `a` through `b`.
        let overlay_b = overlay.get(&Qualifier::new("b"), None).unwrap();
        assert_eq!(overlay_b.import_aliases["z"], "a.z");

        // The parent cache is untouched.
        let parent_b_again = parent.get(&Qualifier::new("b"), None).unwrap();
        assert!(!parent_b_again.import_aliases.contains_key("z"));
    }

    #[test]
    fn test_overlay_update_invalidates_local_consumers() {
        let parent = parent_with(&[("a.py", "x = 1\n"), ("b.py", "from a import *\n")]);
        let overlay = Overlay::new(Arc::clone(&parent));

        overlay.update_overlaid_code(vec![(
            PathBuf::from("/src/a.py"),
            "x = 1\n".to_string(),
        )]);
        overlay.get(&Qualifier::new("b"), None).unwrap();

        let result = overlay.update_overlaid_code(vec![(
            PathBuf::from("/src/a.py"),
            "y = 9\n".to_string(),
        )]);

        assert!(result.invalidated_modules.contains(&Qualifier::new("b")));
        let b = overlay.get(&Qualifier::new("b"), None).unwrap();
        assert_eq!(b.import_aliases["y"], "a.y");
    }

    #[test]
    fn test_non_overlaid_falls_through() {
        let parent = parent_with(&[("a.py", "x = 1\n"), ("c.py", "w = 4\n")]);
        let overlay = Overlay::new(Arc::clone(&parent));
        overlay.update_overlaid_code(vec![(PathBuf::from("/src/a.py"), "x = 2\n".to_string())]);

        let c = overlay.get(&Qualifier::new("c"), None).unwrap();
        assert_eq!(c.exports.names, vec!["w"]);
    }

    #[test]
    fn test_closing_overlay_restores_parent_view() {
        let parent = parent_with(&[("a.py", "x = 1\n"), ("b.py", "from a import *\n")]);
        {
            let overlay = Overlay::new(Arc::clone(&parent));
            overlay.update_overlaid_code(vec![(
                PathBuf::from("/src/a.py"),
                "renamed = 1\n".to_string(),
            )]);
            let b = overlay.get(&Qualifier::new("b"), None).unwrap();
            assert!(b.import_aliases.contains_key("renamed"));
        }

        // Overlay dropped: the parent still resolves the original export.
        let b = parent.get(&Qualifier::new("b"), None).unwrap();
        assert_eq!(b.import_aliases["x"], "a.x");
        assert!(!b.import_aliases.contains_key("renamed"));
    }
}
