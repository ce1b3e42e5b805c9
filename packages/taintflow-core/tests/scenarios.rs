//! End-to-end analysis scenarios

use std::path::PathBuf;
use std::sync::Arc;
use taintflow_core::config::AnalysisConfig;
use taintflow_core::features::analyzer::AnalysisContext;
use taintflow_core::features::call_graph::{CallGraph, DefineIndex, OverrideGraph};
use taintflow_core::features::fixpoint::{FixpointConfig, FixpointDriver};
use taintflow_core::features::model_dsl::{parse_models, ModelErrorKind, RuleSet};
use taintflow_core::features::source_env::Overlay;
use taintflow_core::features::taint::{SourceKind, TaintModel};
use taintflow_core::shared::models::{Qualifier, Target};
use taintflow_core::AnalysisPipeline;

fn pipeline_with(files: &[(&str, &str)]) -> AnalysisPipeline {
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

/// A user-specified source reaching a code-execution sink raises one
/// issue at the call site, under the configured rule code.
#[test]
fn basic_source_to_sink_flow() {
    let dir = tempfile::tempdir().unwrap();
    let rules_path = dir.path().join("rules.json");
    std::fs::write(
        &rules_path,
        r#"{"rules": [{"name": "User input in eval", "code": 6054,
            "sources": ["UserSpecified"], "sinks": ["CodeExecution"],
            "message_format": "{source} flows into {sink}"}]}"#,
    )
    .unwrap();

    let config = AnalysisConfig {
        source_roots: vec![PathBuf::from("/src")],
        rules_path: Some(rules_path),
        workers: 2,
        ..AnalysisConfig::default()
    };
    let pipeline = AnalysisPipeline::with_sources(
        config,
        vec![(
            PathBuf::from("/src/a.py"),
            "import os\ndef f():\n    eval(os.environ[\"X\"])\n".to_string(),
        )],
    );

    let report = pipeline
        .analyze_with_documents(&[
            "os.environ: TaintSource[UserSpecified] = ...\ndef eval(source: TaintSink[CodeExecution]): ...\n"
                .to_string(),
        ])
        .unwrap();

    assert!(report.model_errors.is_empty(), "{:?}", report.model_errors);
    assert_eq!(report.issues.len(), 1);
    let issue = &report.issues[0];
    assert_eq!(issue.code.0, 6054);
    assert_eq!(issue.location.path, PathBuf::from("/src/a.py"));
    assert_eq!(issue.location.line, 3);
}

/// An overlay sees edited content through its dependents while the
/// parent cache stays untouched; closing the overlay restores the
/// original view.
#[test]
fn overlay_shadows_parent_and_restores_on_close() {
    let pipeline = pipeline_with(&[("a.py", "x = 1\n"), ("b.py", "from a import *\n")]);
    let parent = Arc::clone(pipeline.type_env().source_env());

    // Warm the parent view of b.
    let original = parent.get(&Qualifier::new("b"), None).unwrap();
    assert_eq!(original.import_aliases["x"], "a.x");

    {
        let overlay = Overlay::new(Arc::clone(&parent));
        overlay.update_overlaid_code(vec![(
            PathBuf::from("/src/a.py"),
            "x = 2\ny = 3\n".to_string(),
        )]);

        // The overlay resolves b against the edited exports.
        let overlaid = overlay.get(&Qualifier::new("b"), None).unwrap();
        assert_eq!(overlaid.import_aliases["y"], "a.y");

        // The parent cache is unchanged while the overlay is open.
        let parent_view = parent.get(&Qualifier::new("b"), None).unwrap();
        assert!(!parent_view.import_aliases.contains_key("y"));
    }

    // Overlay closed: the original state is what the parent serves.
    let restored = parent.get(&Qualifier::new("b"), None).unwrap();
    assert_eq!(restored.import_aliases["x"], "a.x");
    assert!(!restored.import_aliases.contains_key("y"));
}

/// A recursive function whose naive join grows its tree unboundedly
/// must stabilize within `widen_depth + 2` iterations.
#[test]
fn widening_bounds_recursive_model_growth() {
    let files = [(
        "r.py",
        "def grow(d):\n    out = {}\n    out[\"w\"] = grow(d)\n    return out\n",
    )];
    let tracker = Arc::new(taintflow_core::features::dependency::DependencyTracker::new());
    let source = Arc::new(
        taintflow_core::features::source_env::SourceEnvironment::new(
            vec![taintflow_core::shared::models::SearchRoot::new("/src", 0)],
            tracker,
        ),
    );
    source.add_sources(
        files
            .iter()
            .map(|(p, c)| (PathBuf::from(format!("/src/{p}")), c.to_string())),
    );
    let env = taintflow_core::features::type_env::TypeEnvironment::new(source);
    let index = DefineIndex::build(&env);
    let overrides = OverrideGraph::build(&env, &index);
    let call_graph = CallGraph::build(&env, &index, &overrides);

    let (models, errors) = parse_models(
        "def r.grow(d: TaintInTaintOut[LocalReturn]) -> TaintSource[Grown]: ...\n",
        &env,
    )
    .into_model_map();
    assert!(errors.is_empty());

    let widen_depth = 3usize;
    let mut driver = FixpointDriver::new(FixpointConfig {
        workers: 1,
        widen_depth,
        max_iterations: 50,
        ..FixpointConfig::default()
    });
    let work: Vec<Target> = index.targets().to_vec();
    for target in &work {
        driver.seed_model(target.clone(), models.get(target).cloned().unwrap_or_default());
    }
    let rules = RuleSet::default_rules();
    let ctx = AnalysisContext {
        env: &env,
        call_graph: &call_graph,
        overrides: &overrides,
        index: &index,
        rules: &rules,
        boundary_depth: widen_depth,
    };
    let outcome = driver.run(&ctx, work).expect("must converge");

    assert!(
        outcome.iterations <= (widen_depth + 2) as u32,
        "expected convergence within widen_depth + 2, took {}",
        outcome.iterations
    );
}

/// A name-constrained ModelQuery produces exactly one forward model per
/// matching function, with the source at the return port.
#[test]
fn model_query_produces_models_for_matches() {
    let pipeline = pipeline_with(&[(
        "api.py",
        "def handle_login(req):\n    pass\n\ndef handle_logout(req):\n    pass\n\ndef handle_reset(req):\n    pass\n\ndef internal(req):\n    pass\n\ndef audit(req):\n    pass\n",
    )]);
    let env = pipeline.type_env();
    let index = DefineIndex::build(env);

    let result = parse_models(
        r#"ModelQuery(
    name="handlers",
    find="functions",
    where=[NameConstraint("^handle_")],
    model=[ReturnTaint([TaintSource[UserSpecified]])],
)
"#,
        env,
    );
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let produced = result.queries[0].evaluate(env, &index);
    assert_eq!(produced.len(), 3, "exactly the three handle_ functions");
    for (target, model) in &produced {
        assert!(target.qualified_name().contains("handle_"));
        let at_return = model.forward.read(&TaintModel::return_port());
        let kinds: Vec<&SourceKind> = at_return.element().kind_names().collect();
        assert_eq!(kinds, vec![&SourceKind::new("UserSpecified")]);
    }
}

/// The synthetic override target joins the base method's model with
/// every override's model.
#[test]
fn override_target_joins_member_models() {
    let files = [(
        "m.py",
        "class Base:\n    def m(self):\n        pass\n\nclass Derived(Base):\n    def m(self):\n        pass\n",
    )];
    let tracker = Arc::new(taintflow_core::features::dependency::DependencyTracker::new());
    let source = Arc::new(
        taintflow_core::features::source_env::SourceEnvironment::new(
            vec![taintflow_core::shared::models::SearchRoot::new("/src", 0)],
            tracker,
        ),
    );
    source.add_sources(
        files
            .iter()
            .map(|(p, c)| (PathBuf::from(format!("/src/{p}")), c.to_string())),
    );
    let env = taintflow_core::features::type_env::TypeEnvironment::new(source);
    let index = DefineIndex::build(&env);
    let overrides = OverrideGraph::build(&env, &index);
    let call_graph = CallGraph::build(&env, &index, &overrides);

    let (models, errors) = parse_models(
        "def m.Base.m(self) -> TaintSource[SourceA]: ...\ndef m.Derived.m(self) -> TaintSource[SourceB]: ...\n",
        &env,
    )
    .into_model_map();
    assert!(errors.is_empty(), "{errors:?}");

    let override_target = Target::method("m.Base", "m").as_override().unwrap();
    let mut work: Vec<Target> = index.targets().to_vec();
    work.push(override_target.clone());
    let mut driver = FixpointDriver::new(FixpointConfig {
        workers: 2,
        ..FixpointConfig::default()
    });
    for target in &work {
        driver.seed_model(target.clone(), models.get(target).cloned().unwrap_or_default());
    }
    let rules = RuleSet::default_rules();
    let ctx = AnalysisContext {
        env: &env,
        call_graph: &call_graph,
        overrides: &overrides,
        index: &index,
        rules: &rules,
        boundary_depth: 4,
    };
    driver.run(&ctx, work).expect("must converge");

    let model = driver.models().get(&override_target).expect("override model");
    let at_return = model.forward.read(&TaintModel::return_port());
    assert!(at_return.element().contains_kind(&SourceKind::new("SourceA")));
    assert!(at_return.element().contains_kind(&SourceKind::new("SourceB")));
}

/// An invalid model is reported but the batch continues with the valid
/// declarations.
#[test]
fn invalid_model_reported_batch_continues() {
    let pipeline = pipeline_with(&[("m.py", "def real(p):\n    pass\n")]);
    let env = pipeline.type_env();

    let document = "\
def not.in.env(p: TaintSink[X]): ...
def m.real(p: TaintSink[Shell]): ...
";
    let result = parse_models(document, env);

    assert_eq!(result.errors.len(), 1);
    assert!(matches!(
        result.errors[0].kind,
        ModelErrorKind::NotInEnvironment { ref name } if name == "not.in.env"
    ));
    assert_eq!(result.models.len(), 1);
    assert_eq!(result.models[0].0, Target::function("m.real"));
}
