//! Module dependency graph
//!
//! Import edges between the environment's modules, with Tarjan SCC for
//! cycle awareness. Supplies the deterministic dependencies-first order
//! the check pipeline walks.

use crate::features::source_env::ast::Stmt;
use crate::features::type_env::TypeEnvironment;
use crate::shared::models::Qualifier;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rustc_hash::FxHashMap;

/// Import graph over known modules
pub struct ModuleGraph {
    graph: DiGraph<Qualifier, ()>,
    nodes: FxHashMap<Qualifier, NodeIndex>,

    /// Import cycles (SCCs larger than one module), deterministic order
    cycles: Vec<Vec<Qualifier>>,
}

impl ModuleGraph {
    pub fn build(env: &TypeEnvironment) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = FxHashMap::default();

        let qualifiers = env.source_env().qualifiers();
        for qualifier in &qualifiers {
            let idx = graph.add_node(qualifier.clone());
            nodes.insert(qualifier.clone(), idx);
        }

        for qualifier in &qualifiers {
            let Some(processed) = env.source_env().get(qualifier, None) else {
                continue;
            };
            let from = nodes[qualifier];
            for stmt in &processed.source.statements {
                let imported: Vec<Qualifier> = match stmt {
                    Stmt::Import { names, .. } => names
                        .iter()
                        .map(|alias| Qualifier::new(alias.name.clone()))
                        .collect(),
                    Stmt::ImportFrom { module, .. } => vec![module.clone()],
                    _ => continue,
                };
                for target in imported {
                    if target == *qualifier {
                        continue;
                    }
                    if let Some(&to) = nodes.get(&target) {
                        graph.update_edge(from, to, ());
                    }
                }
            }
        }

        let mut cycles: Vec<Vec<Qualifier>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut names: Vec<Qualifier> =
                    scc.into_iter().map(|idx| graph[idx].clone()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();

        Self {
            graph,
            nodes,
            cycles,
        }
    }

    pub fn cycles(&self) -> &[Vec<Qualifier>] {
        &self.cycles
    }

    /// Modules importing `qualifier`
    pub fn importers_of(&self, qualifier: &Qualifier) -> Vec<Qualifier> {
        let Some(&idx) = self.nodes.get(qualifier) else {
            return Vec::new();
        };
        let mut out: Vec<Qualifier> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out
    }

    /// Dependencies-first order; members of a cycle appear in sorted order
    /// at the position of the cycle.
    pub fn analysis_order(&self) -> Vec<Qualifier> {
        // Tarjan emits SCCs in reverse topological order, which is exactly
        // dependencies-first; flatten with sorted cycle members.
        tarjan_scc(&self.graph)
            .into_iter()
            .flat_map(|scc| {
                let mut names: Vec<Qualifier> =
                    scc.into_iter().map(|idx| self.graph[idx].clone()).collect();
                names.sort();
                names
            })
            .collect()
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

    fn env_with(files: &[(&str, &str)]) -> TypeEnvironment {
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

    #[test]
    fn test_dependencies_come_first() {
        let env = env_with(&[
            ("app.py", "import lib\n"),
            ("lib.py", "import base\n"),
            ("base.py", "x = 1\n"),
        ]);
        let graph = ModuleGraph::build(&env);
        let order = graph.analysis_order();

        let position = |name: &str| {
            order
                .iter()
                .position(|q| q.as_str() == name)
                .expect("module in order")
        };
        assert!(position("base") < position("lib"));
        assert!(position("lib") < position("app"));
    }

    #[test]
    fn test_cycle_detection() {
        let env = env_with(&[
            ("a.py", "import b\n"),
            ("b.py", "import a\n"),
            ("c.py", "x = 1\n"),
        ]);
        let graph = ModuleGraph::build(&env);

        assert_eq!(graph.cycles().len(), 1);
        assert_eq!(
            graph.cycles()[0],
            vec![Qualifier::new("a"), Qualifier::new("b")]
        );
    }

    #[test]
    fn test_importers_of() {
        let env = env_with(&[
            ("app.py", "from lib import thing\n"),
            ("lib.py", "thing = 1\n"),
        ]);
        let graph = ModuleGraph::build(&env);

        assert_eq!(
            graph.importers_of(&Qualifier::new("lib")),
            vec![Qualifier::new("app")]
        );
    }
}
