//! Per-callable abstract interpreters
//!
//! The oracle the fixpoint driver consumes: `analyze_define` runs the
//! forward interpreter over one callable's body against the current callee
//! models and derives the issues plus the new model (forward sources,
//! backward sinks, taint-in-taint-out). Deterministic, and monotone given
//! monotone callee models.

mod backward;
mod forward;

use crate::features::call_graph::{CallGraph, Define, DefineIndex, OverrideGraph};
use crate::features::model_dsl::RuleSet;
use crate::features::taint::{Mode, TaintModel};
use crate::features::type_env::TypeEnvironment;
use crate::shared::models::{Diagnostic, Target};

pub use forward::PassOutput;

/// Everything an analysis pass needs besides the callee models
pub struct AnalysisContext<'a> {
    pub env: &'a TypeEnvironment,
    pub call_graph: &'a CallGraph,
    pub overrides: &'a OverrideGraph,
    pub index: &'a DefineIndex,
    pub rules: &'a RuleSet,

    /// Trees crossing a function boundary collapse to this depth
    pub boundary_depth: usize,
}

/// Callee-model lookup the driver provides (reads the shared table with
/// `get_or_old` semantics)
pub type GetCalleeModel<'a> = dyn Fn(&Target) -> Option<TaintModel> + Sync + 'a;

/// Analyze one callable: returns its issues and its new model.
///
/// `SkipAnalysis` short-circuits to the previous model; sanitizing modes
/// filter the computed trees before they are returned.
pub fn analyze_define(
    ctx: &AnalysisContext<'_>,
    target: &Target,
    define: &Define,
    previous: &TaintModel,
    get_callee_model: &GetCalleeModel<'_>,
) -> (Vec<Diagnostic>, TaintModel) {
    if previous.mode == Mode::SkipAnalysis {
        return (Vec::new(), previous.clone());
    }

    let output = forward::run_pass(ctx, target, define, previous, get_callee_model);
    let new_model = backward::derive_model(ctx, define, previous, &output);
    let mut issues = output.issues;
    issues.sort_by_key(|d| d.sort_key());

    (issues, new_model.apply_sanitizers())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::call_graph::OverrideGraph;
    use crate::features::dependency::DependencyTracker;
    use crate::features::model_dsl::parse_models;
    use crate::features::source_env::SourceEnvironment;
    use crate::features::taint::{SinkKind, SourceKind, TitoKind};
    use crate::shared::models::SearchRoot;
    use rustc_hash::FxHashMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    struct Fixture {
        env: TypeEnvironment,
        index: DefineIndex,
        call_graph: CallGraph,
        overrides: OverrideGraph,
        models: FxHashMap<Target, TaintModel>,
        rules: RuleSet,
    }

    fn fixture(files: &[(&str, &str)], model_doc: &str, rules: RuleSet) -> Fixture {
        let tracker = Arc::new(DependencyTracker::new());
        let source = Arc::new(SourceEnvironment::new(
            vec![SearchRoot::new("/src", 0), SearchRoot::external("/stubs", 9)],
            tracker,
        ));
        let mut all: Vec<(PathBuf, String)> = files
            .iter()
            .map(|(p, c)| (PathBuf::from(format!("/src/{p}")), c.to_string()))
            .collect();
        all.push((
            PathBuf::from("/stubs/builtins.pyi"),
            "def eval(source, globals = ..., locals = ...): ...\ndef exec(source, globals = ..., locals = ...): ...\n".to_string(),
        ));
        all.push((
            PathBuf::from("/stubs/os.pyi"),
            "environ = ...\ndef system(command): ...\n".to_string(),
        ));
        source.add_sources(all);

        let env = TypeEnvironment::new(source);
        let index = DefineIndex::build(&env);
        let overrides = OverrideGraph::build(&env, &index);
        let call_graph = CallGraph::build(&env, &index, &overrides);
        let (models, errors) = parse_models(model_doc, &env).into_model_map();
        assert!(errors.is_empty(), "model errors: {errors:?}");

        Fixture {
            env,
            index,
            call_graph,
            overrides,
            models,
            rules,
        }
    }

    fn analyze(fixture: &Fixture, target: Target) -> (Vec<Diagnostic>, TaintModel) {
        let ctx = AnalysisContext {
            env: &fixture.env,
            call_graph: &fixture.call_graph,
            overrides: &fixture.overrides,
            index: &fixture.index,
            rules: &fixture.rules,
            boundary_depth: 4,
        };
        let define = fixture.index.get(&target).expect("define").clone();
        let previous = fixture
            .models
            .get(&target)
            .cloned()
            .unwrap_or_else(TaintModel::empty);
        let models = fixture.models.clone();
        analyze_define(&ctx, &target, &define, &previous, &move |t| {
            models.get(t).cloned()
        })
    }

    fn s1_rules() -> RuleSet {
        RuleSet::from_json(
            r#"{"rules": [{"name": "Test rule", "code": 9901,
                "sources": ["UserSpecified"], "sinks": ["CodeExecution"],
                "message_format": "{source} reaches {sink}"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_source_to_sink_issue_at_call_site() {
        let fixture = fixture(
            &[(
                "a.py",
                "import os\ndef f():\n    eval(os.environ[\"X\"])\n",
            )],
            "os.environ: TaintSource[UserSpecified] = ...\ndef eval(source: TaintSink[CodeExecution]): ...\n",
            s1_rules(),
        );

        let (issues, _) = analyze(&fixture, Target::function("a.f"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code.0, 9901);
        assert_eq!(issues[0].location.line, 3);
        assert!(issues[0].taint_trace.is_some());
    }

    #[test]
    fn test_return_source_propagates_to_model() {
        let fixture = fixture(
            &[(
                "a.py",
                "import os\ndef read_env():\n    return os.environ[\"X\"]\n",
            )],
            "os.environ: TaintSource[UserSpecified] = ...\n",
            s1_rules(),
        );

        let (_, model) = analyze(&fixture, Target::function("a.read_env"));
        let at_return = model.forward.read(&TaintModel::return_port());
        assert!(at_return
            .element()
            .contains_kind(&SourceKind::new("UserSpecified")));
    }

    #[test]
    fn test_parameter_to_sink_becomes_sink_model() {
        let fixture = fixture(
            &[("a.py", "def launder(cmd):\n    eval(cmd)\n")],
            "def eval(source: TaintSink[CodeExecution]): ...\n",
            s1_rules(),
        );

        let (issues, model) = analyze(&fixture, Target::function("a.launder"));
        // No concrete source flows here, so no issue yet.
        assert!(issues.is_empty());
        // But the parameter now carries the transitive sink.
        let at_cmd = model.backward.sink_tree.read(&TaintModel::param_port("cmd"));
        assert!(at_cmd
            .element()
            .contains_kind(&SinkKind::new("CodeExecution")));
    }

    #[test]
    fn test_identity_function_gets_local_return_tito() {
        let fixture = fixture(
            &[("a.py", "def ident(x):\n    return x\n")],
            "",
            RuleSet::default_rules(),
        );

        let (_, model) = analyze(&fixture, Target::function("a.ident"));
        let tito = model.backward.tito_tree.read(&TaintModel::param_port("x"));
        assert!(tito.element().contains_kind(&TitoKind::LocalReturn));
    }

    #[test]
    fn test_transitive_flow_through_helper() {
        // helper has a sink model on its parameter (computed in an earlier
        // iteration); the caller's source argument must trip the rule.
        let fixture = fixture(
            &[(
                "a.py",
                "import os\ndef helper(data):\n    eval(data)\n\ndef entry():\n    helper(os.environ[\"K\"])\n",
            )],
            "os.environ: TaintSource[UserSpecified] = ...\ndef eval(source: TaintSink[CodeExecution]): ...\ndef a.helper(data: TaintSink[CodeExecution]): ...\n",
            s1_rules(),
        );

        let (issues, _) = analyze(&fixture, Target::function("a.entry"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].location.line, 6);
    }

    #[test]
    fn test_tito_carries_taint_through_call() {
        let fixture = fixture(
            &[(
                "a.py",
                "import os\ndef wrap(x):\n    return len(x)\n\ndef entry():\n    v = wrap(os.environ[\"K\"])\n    eval(v)\n",
            )],
            "os.environ: TaintSource[UserSpecified] = ...\ndef eval(source: TaintSink[CodeExecution]): ...\ndef a.wrap(x: TaintInTaintOut[LocalReturn]): ...\n",
            s1_rules(),
        );

        let (issues, _) = analyze(&fixture, Target::function("a.entry"));
        assert_eq!(issues.len(), 1, "tito must carry the source to the sink");
    }

    #[test]
    fn test_sanitize_mode_blocks_kinds() {
        let fixture = fixture(
            &[(
                "a.py",
                "import os\ndef scrub(v):\n    return v\n",
            )],
            "@Sanitize\ndef a.scrub(v): ...\n",
            s1_rules(),
        );

        let (_, model) = analyze(&fixture, Target::function("a.scrub"));
        // The tito the body would produce is filtered by the sanitizer.
        let tito = model.backward.tito_tree.read(&TaintModel::param_port("v"));
        assert!(tito.is_bottom());
    }

    #[test]
    fn test_skip_analysis_returns_previous() {
        let fixture = fixture(
            &[("a.py", "import os\ndef opaque():\n    return os.environ[\"X\"]\n")],
            "os.environ: TaintSource[UserSpecified] = ...\n@SkipAnalysis\ndef a.opaque(): ...\n",
            s1_rules(),
        );

        let (issues, model) = analyze(&fixture, Target::function("a.opaque"));
        assert!(issues.is_empty());
        // The body is never interpreted: no return source appears.
        assert!(model.forward.read(&TaintModel::return_port()).is_bottom());
    }
}
