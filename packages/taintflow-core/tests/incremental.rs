//! Incremental-update properties
//!
//! Determinism across event orders and equivalence of selective
//! invalidation with a from-scratch rebuild. Diagnostic-list comparisons
//! go through `pretty_assertions` so a mismatch shows the offending entry
//! rather than two opaque vectors.

use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use taintflow_core::features::dependency::DependencyTracker;
use taintflow_core::features::source_env::{FileEvent, SourceEnvironment};
use taintflow_core::features::type_env::TypeEnvironment;
use taintflow_core::shared::models::{Diagnostic, Qualifier, SearchRoot};

fn fresh_env(files: &[(&str, &str)]) -> TypeEnvironment {
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
    TypeEnvironment::new(source)
}

fn check_all(env: &TypeEnvironment, modules: &[&str]) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for module in modules {
        out.extend(env.check_module(&Qualifier::new(*module)).iter().cloned());
    }
    out.sort_by_key(|d| d.sort_key());
    out
}

fn changed(path: &str, content: &str) -> FileEvent {
    FileEvent::CreatedOrChanged {
        path: PathBuf::from(format!("/src/{path}")),
        content: content.to_string(),
    }
}

/// Any permutation of update events leading to the same final sources
/// yields the same diagnostics.
#[test]
fn update_order_is_deterministic() {
    let initial: &[(&str, &str)] = &[
        ("a.py", "def f():\n    return 1\n"),
        ("b.py", "from a import *\ny = f()\n"),
    ];
    let final_a = "def g():\n    return missing\n";
    let final_b = "from a import *\ny = g()\n";

    // Order one: a then b.
    let env1 = fresh_env(initial);
    let _ = check_all(&env1, &["a", "b"]);
    env1.update(vec![changed("a.py", final_a)]);
    env1.update(vec![changed("b.py", final_b)]);
    let diags1 = check_all(&env1, &["a", "b"]);

    // Order two: b then a.
    let env2 = fresh_env(initial);
    let _ = check_all(&env2, &["a", "b"]);
    env2.update(vec![changed("b.py", final_b)]);
    env2.update(vec![changed("a.py", final_a)]);
    let diags2 = check_all(&env2, &["a", "b"]);

    // And a single batched update.
    let env3 = fresh_env(initial);
    let _ = check_all(&env3, &["a", "b"]);
    env3.update(vec![changed("a.py", final_a), changed("b.py", final_b)]);
    let diags3 = check_all(&env3, &["a", "b"]);

    assert_eq!(diags1, diags2);
    assert_eq!(diags1, diags3);
}

/// Recomputing only the invalidated closure reproduces a from-scratch run
/// on the post-update sources.
#[test]
fn incremental_matches_from_scratch() {
    let initial: &[(&str, &str)] = &[
        ("base.py", "class Base:\n    def handle(self) -> int:\n        return 1\n"),
        (
            "child.py",
            "from base import Base\nclass Child(Base):\n    pass\n\ndef use(c: Child):\n    return c.handle()\n",
        ),
    ];
    let edited_base = "class Base:\n    pass\n";

    // Incremental path: warm everything, then update.
    let env = fresh_env(initial);
    let _ = check_all(&env, &["base", "child"]);
    assert!(env.resolve_attribute("child.Child", "handle").is_some());
    env.update(vec![changed("base.py", edited_base)]);
    let incremental = check_all(&env, &["base", "child"]);
    let incremental_attr = env.resolve_attribute("child.Child", "handle");

    // From-scratch path on the post-update sources.
    let scratch = fresh_env(&[("base.py", edited_base), (initial[1].0, initial[1].1)]);
    let from_scratch = check_all(&scratch, &["base", "child"]);
    let scratch_attr = scratch.resolve_attribute("child.Child", "handle");

    assert_eq!(incremental, from_scratch);
    assert_eq!(incremental_attr, scratch_attr);
}

/// A deleted module disappears from every layer.
#[test]
fn deletion_propagates() {
    let env = fresh_env(&[
        ("a.py", "x = 1\n"),
        ("b.py", "from a import *\n"),
    ]);
    let _ = env
        .source_env()
        .get(&Qualifier::new("b"), None)
        .unwrap();

    let result = env.update(vec![FileEvent::Deleted {
        path: PathBuf::from("/src/a.py"),
    }]);

    assert!(result
        .invalidated_modules
        .contains(&Qualifier::new("a")));
    assert!(env.source_env().get(&Qualifier::new("a"), None).is_none());

    // b reprocesses without the wildcard names.
    let b = env.source_env().get(&Qualifier::new("b"), None).unwrap();
    assert!(!b.import_aliases.contains_key("x"));
}
