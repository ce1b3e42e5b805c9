//! Per-callable taint model
//!
//! `{ forward, backward: { sink_tree, tito_tree }, mode }`. Ports are the
//! first label of each tree path: one field per parameter name, plus the
//! distinguished `$return` port.

use super::element::TaintElement;
use super::kinds::{SinkKind, SourceKind, TitoKind};
use super::{SinkTree, SourceTree, TitoTree};
use crate::features::abstract_domain::{AccessPath, PathLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Port name for the return value in model trees
pub const RETURN_PORT: &str = "$return";

/// Kind filter carried by a sanitizing model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SanitizeFilter<K: Ord> {
    /// Every kind is stopped
    All,

    /// Only the listed kinds are stopped
    Kinds(BTreeSet<K>),
}

impl<K: Ord + Clone> SanitizeFilter<K> {
    pub fn stops(&self, kind: &K) -> bool {
        match self {
            SanitizeFilter::All => true,
            SanitizeFilter::Kinds(kinds) => kinds.contains(kind),
        }
    }

    fn union(left: &Option<Self>, right: &Option<Self>) -> Option<Self> {
        match (left, right) {
            (None, other) | (other, None) => other.clone(),
            (Some(SanitizeFilter::All), _) | (_, Some(SanitizeFilter::All)) => {
                Some(SanitizeFilter::All)
            }
            (Some(SanitizeFilter::Kinds(a)), Some(SanitizeFilter::Kinds(b))) => {
                Some(SanitizeFilter::Kinds(a.union(b).cloned().collect()))
            }
        }
    }
}

/// The three optional sanitizer filters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sanitizers {
    pub sources: Option<SanitizeFilter<SourceKind>>,
    pub sinks: Option<SanitizeFilter<SinkKind>>,
    pub tito: Option<SanitizeFilter<TitoKind>>,
}

impl Sanitizers {
    pub fn all() -> Self {
        Self {
            sources: Some(SanitizeFilter::All),
            sinks: Some(SanitizeFilter::All),
            tito: Some(SanitizeFilter::All),
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            sources: SanitizeFilter::union(&self.sources, &other.sources),
            sinks: SanitizeFilter::union(&self.sinks, &other.sinks),
            tito: SanitizeFilter::union(&self.tito, &other.tito),
        }
    }
}

/// Analysis mode of a callable
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Normal,

    /// The oracle is never invoked; the declared model is final
    SkipAnalysis,

    /// Flows through this callable drop the filtered kinds
    Sanitize(Sanitizers),
}

impl Mode {
    /// `join(Normal, x) = x`; `SkipAnalysis` absorbs; sanitizers union.
    pub fn join(&self, other: &Mode) -> Mode {
        match (self, other) {
            (Mode::SkipAnalysis, _) | (_, Mode::SkipAnalysis) => Mode::SkipAnalysis,
            (Mode::Normal, x) | (x, Mode::Normal) => x.clone(),
            (Mode::Sanitize(a), Mode::Sanitize(b)) => Mode::Sanitize(a.union(b)),
        }
    }
}

/// Backward half of a model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackwardModel {
    pub sink_tree: SinkTree,
    pub tito_tree: TitoTree,
}

impl BackwardModel {
    pub fn is_bottom(&self) -> bool {
        self.sink_tree.is_bottom() && self.tito_tree.is_bottom()
    }

    pub fn join(&self, other: &Self) -> Self {
        Self {
            sink_tree: self.sink_tree.join(&other.sink_tree),
            tito_tree: self.tito_tree.join(&other.tito_tree),
        }
    }

    pub fn widen(&self, next: &Self, depth: usize) -> Self {
        Self {
            sink_tree: self.sink_tree.widen(&next.sink_tree, depth),
            tito_tree: self.tito_tree.widen(&next.tito_tree, depth),
        }
    }

    pub fn less_or_equal(&self, other: &Self) -> bool {
        self.sink_tree.less_or_equal(&other.sink_tree)
            && self.tito_tree.less_or_equal(&other.tito_tree)
    }
}

/// Complete per-callable taint model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaintModel {
    pub forward: SourceTree,
    pub backward: BackwardModel,
    pub mode: Mode,
}

impl TaintModel {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_bottom(&self) -> bool {
        self.forward.is_bottom() && self.backward.is_bottom() && self.mode == Mode::Normal
    }

    /// The path of a parameter port
    pub fn param_port(name: &str) -> AccessPath {
        AccessPath::new(vec![PathLabel::field(name)])
    }

    /// The path of the return port
    pub fn return_port() -> AccessPath {
        AccessPath::new(vec![PathLabel::field(RETURN_PORT)])
    }

    pub fn join(&self, other: &Self) -> Self {
        Self {
            forward: self.forward.join(&other.forward),
            backward: self.backward.join(&other.backward),
            mode: self.mode.join(&other.mode),
        }
    }

    /// Depth-bounded widening across every tree
    pub fn widen(&self, next: &Self, depth: usize) -> Self {
        Self {
            forward: self.forward.widen(&next.forward, depth),
            backward: self.backward.widen(&next.backward, depth),
            mode: self.mode.join(&next.mode),
        }
    }

    pub fn less_or_equal(&self, other: &Self) -> bool {
        // Mode ordering: Normal is bottom, SkipAnalysis is top.
        let mode_leq = match (&self.mode, &other.mode) {
            (Mode::Normal, _) => true,
            (_, Mode::SkipAnalysis) => true,
            (a, b) => a == b || a.join(b) == *b,
        };
        mode_leq
            && self.forward.less_or_equal(&other.forward)
            && self.backward.less_or_equal(&other.backward)
    }

    /// The contribution a method makes to its override target: ports
    /// survive but deep structure is collapsed, keeping override joins
    /// bounded regardless of how many subclasses participate.
    pub fn for_override_model(&self) -> TaintModel {
        TaintModel {
            forward: self.forward.collapse_to(1),
            backward: BackwardModel {
                sink_tree: self.backward.sink_tree.collapse_to(1),
                tito_tree: self.backward.tito_tree.collapse_to(1),
            },
            mode: self.mode.clone(),
        }
    }

    /// Drop sanitized kinds from every tree according to `mode`
    pub fn apply_sanitizers(&self) -> TaintModel {
        let Mode::Sanitize(sanitizers) = &self.mode else {
            return self.clone();
        };
        let mut model = self.clone();
        if let Some(filter) = &sanitizers.sources {
            let filter = filter.clone();
            model.forward = model
                .forward
                .transform(&move |e: &TaintElement<SourceKind>| {
                    e.filter_kinds(|k| !filter.stops(k))
                });
        }
        if let Some(filter) = &sanitizers.sinks {
            let filter = filter.clone();
            model.backward.sink_tree =
                model
                    .backward
                    .sink_tree
                    .transform(&move |e: &TaintElement<SinkKind>| {
                        e.filter_kinds(|k| !filter.stops(k))
                    });
        }
        if let Some(filter) = &sanitizers.tito {
            let filter = filter.clone();
            model.backward.tito_tree =
                model
                    .backward
                    .tito_tree
                    .transform(&move |e: &TaintElement<TitoKind>| {
                        e.filter_kinds(|k| !filter.stops(k))
                    });
        }
        model
    }

    /// Keep only kinds relevant to the given rule surface; everything else
    /// is dropped at registration time.
    pub fn restrict_to_kinds(
        &self,
        sources: &BTreeSet<SourceKind>,
        sinks: &BTreeSet<SinkKind>,
    ) -> TaintModel {
        let sources = sources.clone();
        let sinks = sinks.clone();
        TaintModel {
            forward: self
                .forward
                .transform(&move |e: &TaintElement<SourceKind>| {
                    e.filter_kinds(|k| sources.contains(k))
                }),
            backward: BackwardModel {
                sink_tree: self
                    .backward
                    .sink_tree
                    .transform(&move |e: &TaintElement<SinkKind>| {
                        e.filter_kinds(|k| sinks.contains(k))
                    }),
                tito_tree: self.backward.tito_tree.clone(),
            },
            mode: self.mode.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::taint::{SourceTaint, TitoTaint};

    fn source_model(kind: &str, port: &str) -> TaintModel {
        let mut model = TaintModel::empty();
        model.forward = SourceTree::create_leaf(
            &TaintModel::param_port(port),
            SourceTaint::declared(SourceKind::new(kind)),
        );
        model
    }

    #[test]
    fn test_mode_join_laws() {
        let sanitize = Mode::Sanitize(Sanitizers::all());

        assert_eq!(Mode::Normal.join(&sanitize), sanitize);
        assert_eq!(sanitize.join(&Mode::SkipAnalysis), Mode::SkipAnalysis);
        assert_eq!(Mode::Normal.join(&Mode::Normal), Mode::Normal);
    }

    #[test]
    fn test_model_join_is_upper_bound() {
        let a = source_model("A", "x");
        let b = source_model("B", "y");
        let joined = a.join(&b);

        assert!(a.less_or_equal(&joined));
        assert!(b.less_or_equal(&joined));
    }

    #[test]
    fn test_override_contribution_is_depth_bounded() {
        let mut model = TaintModel::empty();
        model.forward = SourceTree::create_leaf(
            &AccessPath::new(vec![
                PathLabel::field(RETURN_PORT),
                PathLabel::field("deep"),
                PathLabel::field("deeper"),
            ]),
            SourceTaint::declared(SourceKind::new("A")),
        );

        let contribution = model.for_override_model();
        assert!(contribution.forward.depth() <= 1);
        assert!(model.forward.less_or_equal(&contribution.forward));
    }

    #[test]
    fn test_sanitize_drops_kinds() {
        let mut model = source_model("A", "x").join(&source_model("B", "x"));
        model.mode = Mode::Sanitize(Sanitizers {
            sources: Some(SanitizeFilter::Kinds(
                [SourceKind::new("A")].into_iter().collect(),
            )),
            sinks: None,
            tito: None,
        });

        let sanitized = model.apply_sanitizers();
        let at_port = sanitized.forward.read(&TaintModel::param_port("x"));
        assert!(!at_port.element().contains_kind(&SourceKind::new("A")));
        assert!(at_port.element().contains_kind(&SourceKind::new("B")));
    }

    #[test]
    fn test_rule_filter_restriction() {
        let model = source_model("Kept", "x").join(&source_model("Dropped", "x"));
        let restricted = model.restrict_to_kinds(
            &[SourceKind::new("Kept")].into_iter().collect(),
            &BTreeSet::new(),
        );

        let at_port = restricted.forward.read(&TaintModel::param_port("x"));
        assert!(at_port.element().contains_kind(&SourceKind::new("Kept")));
        assert!(!at_port.element().contains_kind(&SourceKind::new("Dropped")));
    }

    #[test]
    fn test_tito_model_round_trip() {
        let mut model = TaintModel::empty();
        model.backward.tito_tree = TitoTree::create_leaf(
            &TaintModel::param_port("data"),
            TitoTaint::declared(TitoKind::LocalReturn),
        );

        let read = model.backward.tito_tree.read(&TaintModel::param_port("data"));
        assert!(read.element().contains_kind(&TitoKind::LocalReturn));
    }
}
