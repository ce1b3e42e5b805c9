//! Whole-program orchestration
//!
//! Wires the features together: discover sources, build the layered
//! environment, construct the call and override graphs, seed models from
//! the DSL, drive the fixpoint, and collect diagnostics. The `check` path
//! runs only the type-check layer; `analyze` runs the taint fixpoint.

mod module_graph;
mod prelude;

pub use module_graph::ModuleGraph;
pub use prelude::{prelude_root, prelude_sources, write_snapshot, PRELUDE_ROOT};

use crate::config::AnalysisConfig;
use crate::errors::Result;
use crate::features::analyzer::AnalysisContext;
use crate::features::call_graph::{CallGraph, DefineIndex, OverrideGraph};
use crate::features::dependency::DependencyTracker;
use crate::features::fixpoint::{FixpointConfig, FixpointDriver};
use crate::features::model_dsl::{parse_models, ModelError, RuleSet};
use crate::features::shared_memory::save_snapshot;
use crate::features::source_env::{FileEvent, ParseResult, SourceEnvironment};
use crate::features::taint::TaintModel;
use crate::features::type_env::{EnvUpdateResult, TypeEnvironment};
use crate::shared::models::{Diagnostic, DiagnosticCode, Qualifier, SearchRoot, Severity, Target};
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Result of one taint analysis run
#[derive(Debug)]
pub struct AnalysisReport {
    pub issues: Vec<Diagnostic>,
    pub model_errors: Vec<ModelError>,
    pub iterations: u32,
    pub stopped_early: bool,
    pub expensive_callables: usize,
}

impl AnalysisReport {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|d| d.severity == Severity::Error)
    }
}

/// The assembled analysis stack
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    type_env: TypeEnvironment,
}

impl AnalysisPipeline {
    /// Build from on-disk sources under the configured roots
    pub fn from_disk(config: AnalysisConfig) -> Result<Self> {
        let mut sources = Vec::new();
        for root in config.source_roots.iter().chain(config.stub_roots.iter()) {
            for entry in WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                let is_module = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e == "py" || e == "pyi")
                    .unwrap_or(false);
                if entry.file_type().is_file() && is_module {
                    let content = std::fs::read_to_string(path)?;
                    sources.push((path.to_path_buf(), content));
                }
            }
        }
        Ok(Self::with_sources(config, sources))
    }

    /// Build from in-memory `(path, content)` pairs
    pub fn with_sources(config: AnalysisConfig, sources: Vec<(PathBuf, String)>) -> Self {
        let mut roots = Vec::new();
        for (i, root) in config.source_roots.iter().enumerate() {
            roots.push(SearchRoot::new(root.clone(), i as u32));
        }
        let offset = roots.len() as u32;
        for (i, root) in config.stub_roots.iter().enumerate() {
            roots.push(SearchRoot::external(root.clone(), offset + i as u32));
        }
        roots.push(prelude_root());

        let tracker = Arc::new(DependencyTracker::new());
        let source_env = Arc::new(SourceEnvironment::new(roots, tracker));
        source_env.add_sources(sources);
        source_env.add_sources(prelude_sources());

        Self {
            config,
            type_env: TypeEnvironment::new(source_env),
        }
    }

    pub fn type_env(&self) -> &TypeEnvironment {
        &self.type_env
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Project modules: everything outside stub/prelude roots
    pub fn project_modules(&self) -> Vec<Qualifier> {
        self.type_env
            .source_env()
            .qualifiers()
            .into_iter()
            .filter(|q| {
                self.type_env
                    .source_env()
                    .module_path(q)
                    .map(|m| !m.is_external)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// One-shot type check over every project module, dependencies first
    pub fn check(&self) -> Vec<Diagnostic> {
        let graph = ModuleGraph::build(&self.type_env);
        let project: rustc_hash::FxHashSet<Qualifier> =
            self.project_modules().into_iter().collect();

        let mut diagnostics = Vec::new();
        for qualifier in graph.analysis_order() {
            if !project.contains(&qualifier) {
                continue;
            }
            // A parse failure is its own diagnostic; the stubbed module
            // is not otherwise checked.
            if let Some(raw) = self.type_env.source_env().get_raw(&qualifier) {
                if let ParseResult::Failure(failure) = raw.as_ref() {
                    let path = self
                        .type_env
                        .source_env()
                        .source_path(&qualifier)
                        .unwrap_or_else(|| PathBuf::from(qualifier.as_str()));
                    diagnostics.push(Diagnostic::error(
                        DiagnosticCode::PARSE_ERROR,
                        path,
                        failure.span,
                        failure.message.clone(),
                    ));
                    continue;
                }
            }
            diagnostics.extend(self.type_env.check_module(&qualifier).iter().cloned());
        }
        diagnostics.sort_by_key(|d| d.sort_key());
        diagnostics
    }

    /// Run the taint fixpoint with the configured model documents
    pub fn analyze(&self) -> Result<AnalysisReport> {
        let mut documents = Vec::new();
        for path in &self.config.model_paths {
            documents.push(std::fs::read_to_string(path)?);
        }
        self.analyze_with_documents(&documents)
    }

    /// Run the taint fixpoint with in-memory model documents
    pub fn analyze_with_documents(&self, documents: &[String]) -> Result<AnalysisReport> {
        let mut rules = match &self.config.rules_path {
            Some(path) => RuleSet::from_path(path)?,
            None => RuleSet::default_rules(),
        };
        let rule_filter = self.config.rule_filter.as_deref();
        if rule_filter.is_some() {
            rules = rules.filtered(rule_filter);
        }

        // The graphs the fixpoint iterates over.
        let index = DefineIndex::build(&self.type_env);
        let overrides = OverrideGraph::build(&self.type_env, &index);
        let call_graph = CallGraph::build(&self.type_env, &index, &overrides);
        info!(targets = index.len(), "call graph constructed");

        // Parse and evaluate the model surface.
        let mut model_errors = Vec::new();
        let mut models: FxHashMap<Target, TaintModel> = FxHashMap::default();
        let mut skip_overrides = rustc_hash::FxHashSet::default();
        for document in documents {
            let mut parsed = parse_models(document, &self.type_env);
            for query in &parsed.queries {
                parsed.models.extend(query.evaluate(&self.type_env, &index));
            }
            if rule_filter.is_some() {
                parsed.filter_to_rules(&rules);
            }
            skip_overrides.extend(parsed.skip_overrides.iter().cloned());
            let (map, errors) = parsed.into_model_map();
            model_errors.extend(errors);
            for (target, model) in map {
                match models.get_mut(&target) {
                    Some(existing) => *existing = existing.join(&model),
                    None => {
                        models.insert(target, model);
                    }
                }
            }
        }

        // Work list: every define, every modeled target, every override
        // target not skipped.
        let mut work: Vec<Target> = index.targets().to_vec();
        work.extend(models.keys().cloned());
        for method in overrides.overridden_methods() {
            if skip_overrides.contains(&method) {
                debug!(target = %method, "overrides skipped by model");
                continue;
            }
            if let Some(override_target) = method.as_override() {
                work.push(override_target);
            }
        }
        work.sort();
        work.dedup();

        let mut driver = FixpointDriver::new(FixpointConfig {
            max_iterations: self.config.max_iterations,
            widen_depth: self.config.widen_depth,
            expensive_callable_ms: self.config.expensive_callable_ms,
            workers: self.config.effective_workers(),
        });
        for target in &work {
            let model = models.get(target).cloned().unwrap_or_default();
            driver.seed_model(target.clone(), model);
        }

        let ctx = AnalysisContext {
            env: &self.type_env,
            call_graph: &call_graph,
            overrides: &overrides,
            index: &index,
            rules: &rules,
            boundary_depth: self.config.widen_depth,
        };
        let outcome = driver.run(&ctx, work)?;

        // Persisted state: stub snapshot plus the epoch-tagged model heap.
        if let Some(cache_dir) = &self.config.cache_dir {
            write_snapshot(cache_dir)?;
            save_snapshot(
                driver.models().as_ref(),
                &cache_dir.join("models.bin"),
                driver.epoch(),
            )?;
        }

        Ok(AnalysisReport {
            issues: driver.issues(),
            model_errors,
            iterations: outcome.iterations,
            stopped_early: outcome.stopped_early,
            expensive_callables: outcome.expensive_callables.len(),
        })
    }

    /// Incremental update entry point for server mode
    pub fn update(&self, events: Vec<FileEvent>) -> EnvUpdateResult {
        self.type_env.update(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(files: &[(&str, &str)]) -> AnalysisPipeline {
        let config = AnalysisConfig {
            source_roots: vec![PathBuf::from("/src")],
            workers: 2,
            ..AnalysisConfig::default()
        };
        AnalysisPipeline::with_sources(
            config,
            files
                .iter()
                .map(|(p, c)| (PathBuf::from(format!("/src/{p}")), c.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_check_reports_parse_and_name_errors() {
        let pipeline = pipeline(&[
            ("ok.py", "def f():\n    return missing\n"),
            ("broken.py", "def f(:\n"),
        ]);
        let diagnostics = pipeline.check();

        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::PARSE_ERROR));
        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::UNDEFINED_NAME));
    }

    #[test]
    fn test_check_skips_prelude_modules() {
        let pipeline = pipeline(&[("ok.py", "x = 1\n")]);
        let diagnostics = pipeline.check();
        assert!(diagnostics.is_empty(), "unexpected: {diagnostics:?}");
    }

    #[test]
    fn test_analyze_end_to_end() {
        let pipeline = pipeline(&[(
            "a.py",
            "import os\ndef f():\n    eval(os.environ[\"X\"])\n",
        )]);
        let report = pipeline
            .analyze_with_documents(&[
                "os.environ: TaintSource[UserControlled] = ...\ndef eval(source: TaintSink[RemoteCodeExecution]): ...\n".to_string(),
            ])
            .unwrap();

        assert!(report.model_errors.is_empty(), "{:?}", report.model_errors);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].code.0, 5001);
        assert!(report.has_errors());
        assert!(!report.stopped_early);
    }

    #[test]
    fn test_rule_filter_drops_unreachable_kinds() {
        let pipeline = {
            let config = AnalysisConfig {
                source_roots: vec![PathBuf::from("/src")],
                rule_filter: Some(vec![5005]),
                workers: 2,
                ..AnalysisConfig::default()
            };
            AnalysisPipeline::with_sources(
                config,
                vec![(
                    PathBuf::from("/src/a.py"),
                    "import os\ndef f():\n    eval(os.environ[\"X\"])\n".to_string(),
                )],
            )
        };
        let report = pipeline
            .analyze_with_documents(&[
                "os.environ: TaintSource[UserControlled] = ...\ndef eval(source: TaintSink[RemoteCodeExecution]): ...\n".to_string(),
            ])
            .unwrap();

        // Only the SQL rule remains; the RCE flow is filtered at
        // registration and produces nothing.
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_cache_directory_populated() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalysisConfig {
            source_roots: vec![PathBuf::from("/src")],
            cache_dir: Some(dir.path().to_path_buf()),
            workers: 1,
            ..AnalysisConfig::default()
        };
        let pipeline = AnalysisPipeline::with_sources(
            config,
            vec![(PathBuf::from("/src/a.py"), "def f():\n    pass\n".to_string())],
        );
        pipeline.analyze_with_documents(&[]).unwrap();

        assert!(dir.path().join("stubs/builtins.pyi").exists());
        assert!(dir.path().join("models.bin").exists());
    }
}
