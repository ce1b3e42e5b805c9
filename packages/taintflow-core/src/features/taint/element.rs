//! Leaf element of the taint trees
//!
//! A product lattice: kind set × trace-info set × breadcrumb set, keyed by
//! kind. This is the `E` the domain tree is instantiated with for sources,
//! sinks and taint-in-taint-out alike.

use super::kinds::Breadcrumb;
use super::trace::{canonicalize, covered_by, TraceInfo};
use crate::features::abstract_domain::AbstractLattice;
use crate::shared::models::Span;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-kind flow payload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowDetails {
    pub traces: BTreeSet<TraceInfo>,
    pub breadcrumbs: BTreeSet<Breadcrumb>,
}

impl FlowDetails {
    pub fn declared() -> Self {
        Self {
            traces: [TraceInfo::declaration()].into_iter().collect(),
            breadcrumbs: BTreeSet::new(),
        }
    }

    pub fn declared_with_leaf_name() -> Self {
        Self {
            traces: [TraceInfo::Declaration {
                leaf_name_provided: true,
            }]
            .into_iter()
            .collect(),
            breadcrumbs: BTreeSet::new(),
        }
    }

    fn joined(&self, other: &Self) -> Self {
        let mut traces = self.traces.clone();
        traces.extend(other.traces.iter().cloned());
        let mut breadcrumbs = self.breadcrumbs.clone();
        breadcrumbs.extend(other.breadcrumbs.iter().cloned());
        Self {
            traces: canonicalize(traces),
            breadcrumbs,
        }
    }

    fn leq(&self, other: &Self) -> bool {
        self.breadcrumbs.is_subset(&other.breadcrumbs)
            && self
                .traces
                .iter()
                .all(|t| other.traces.iter().any(|o| covered_by(t, o)))
    }

    /// Shortest distance to the declaration among the witnesses
    pub fn min_distance(&self) -> u32 {
        self.traces
            .iter()
            .map(TraceInfo::distance)
            .min()
            .unwrap_or(0)
    }
}

/// Kind-keyed taint element
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaintElement<K: Ord + Clone + Eq> {
    kinds: BTreeMap<K, FlowDetails>,
}

impl<K: Ord + Clone + Eq> TaintElement<K> {
    /// One kind introduced by a model declaration
    pub fn declared(kind: K) -> Self {
        Self {
            kinds: [(kind, FlowDetails::declared())].into_iter().collect(),
        }
    }

    pub fn singleton(kind: K, details: FlowDetails) -> Self {
        Self {
            kinds: [(
                kind,
                FlowDetails {
                    traces: canonicalize(details.traces),
                    breadcrumbs: details.breadcrumbs,
                },
            )]
            .into_iter()
            .collect(),
        }
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = K>) -> Self {
        Self {
            kinds: kinds
                .into_iter()
                .map(|k| (k, FlowDetails::declared()))
                .collect(),
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = (&K, &FlowDetails)> {
        self.kinds.iter()
    }

    pub fn kind_names(&self) -> impl Iterator<Item = &K> {
        self.kinds.keys()
    }

    pub fn contains_kind(&self, kind: &K) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn details(&self, kind: &K) -> Option<&FlowDetails> {
        self.kinds.get(kind)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Keep only kinds satisfying the predicate
    pub fn filter_kinds(&self, keep: impl Fn(&K) -> bool) -> Self {
        Self {
            kinds: self
                .kinds
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, d)| (k.clone(), d.clone()))
                .collect(),
        }
    }

    /// Attach a breadcrumb to every kind
    pub fn with_breadcrumb(&self, breadcrumb: Breadcrumb) -> Self {
        self.with_breadcrumbs(std::iter::once(breadcrumb))
    }

    pub fn with_breadcrumbs(&self, breadcrumbs: impl IntoIterator<Item = Breadcrumb> + Clone) -> Self {
        Self {
            kinds: self
                .kinds
                .iter()
                .map(|(k, d)| {
                    let mut details = d.clone();
                    details
                        .breadcrumbs
                        .extend(breadcrumbs.clone().into_iter());
                    (k.clone(), details)
                })
                .collect(),
        }
    }

    /// Push every trace one call further from its declaration; used when a
    /// callee model is applied at a call site.
    pub fn through_call(&self, callee: &str, span: Span) -> Self {
        Self {
            kinds: self
                .kinds
                .iter()
                .map(|(k, d)| {
                    let traces = canonicalize(
                        d.traces
                            .iter()
                            .map(|t| t.extended_through(callee, span))
                            .collect(),
                    );
                    (
                        k.clone(),
                        FlowDetails {
                            traces,
                            breadcrumbs: d.breadcrumbs.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl<K: Ord + Clone + Eq> AbstractLattice for TaintElement<K> {
    fn bottom() -> Self {
        Self {
            kinds: BTreeMap::new(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.kinds.is_empty()
    }

    fn join(&self, other: &Self) -> Self {
        if other.kinds.is_empty() {
            return self.clone();
        }
        if self.kinds.is_empty() {
            return other.clone();
        }
        let mut kinds = self.kinds.clone();
        for (kind, details) in &other.kinds {
            match kinds.get_mut(kind) {
                Some(existing) => *existing = existing.joined(details),
                None => {
                    kinds.insert(kind.clone(), details.clone());
                }
            }
        }
        Self { kinds }
    }

    fn widen(&self, next: &Self) -> Self {
        // Kinds are drawn from the finitely many declared names, traces
        // canonicalize to one witness per callee, and breadcrumbs are
        // finite; the product has finite height, so join suffices.
        self.join(next)
    }

    fn less_or_equal(&self, other: &Self) -> bool {
        self.kinds.iter().all(|(kind, details)| {
            other
                .kinds
                .get(kind)
                .map(|o| details.leq(o))
                .unwrap_or(false)
        })
    }

    fn subtract(&self, other: &Self) -> Self {
        Self {
            kinds: self
                .kinds
                .iter()
                .filter(|(kind, details)| {
                    other
                        .kinds
                        .get(*kind)
                        .map(|o| !details.leq(o))
                        .unwrap_or(true)
                })
                .map(|(k, d)| (k.clone(), d.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::taint::SourceKind;

    fn kind(name: &str) -> SourceKind {
        SourceKind::new(name)
    }

    #[test]
    fn test_join_unions_kinds() {
        let a = TaintElement::declared(kind("A"));
        let b = TaintElement::declared(kind("B"));
        let joined = a.join(&b);

        assert!(joined.contains_kind(&kind("A")));
        assert!(joined.contains_kind(&kind("B")));
        assert!(a.less_or_equal(&joined));
        assert!(b.less_or_equal(&joined));
    }

    #[test]
    fn test_join_keeps_shortest_trace() {
        let far = TaintElement::singleton(
            kind("A"),
            FlowDetails {
                traces: [TraceInfo::call_site("m.f", Span::zero(), 5)]
                    .into_iter()
                    .collect(),
                breadcrumbs: BTreeSet::new(),
            },
        );
        let near = TaintElement::singleton(
            kind("A"),
            FlowDetails {
                traces: [TraceInfo::call_site("m.f", Span::zero(), 2)]
                    .into_iter()
                    .collect(),
                breadcrumbs: BTreeSet::new(),
            },
        );

        let joined = far.join(&near);
        assert_eq!(joined.details(&kind("A")).unwrap().min_distance(), 2);
        assert!(far.less_or_equal(&joined));
        assert!(near.less_or_equal(&joined));
    }

    #[test]
    fn test_through_call_increments_distance() {
        let declared = TaintElement::declared(kind("A"));
        let propagated = declared.through_call("m.helper", Span::zero());

        assert_eq!(propagated.details(&kind("A")).unwrap().min_distance(), 1);
        // Repeated application converges distance-wise under join.
        let again = propagated.through_call("m.helper", Span::zero());
        let joined = propagated.join(&again);
        assert_eq!(joined.details(&kind("A")).unwrap().min_distance(), 1);
    }

    #[test]
    fn test_breadcrumb_application() {
        let element =
            TaintElement::declared(kind("A")).with_breadcrumb(Breadcrumb::feature("shell"));

        assert!(element
            .details(&kind("A"))
            .unwrap()
            .breadcrumbs
            .contains(&Breadcrumb::feature("shell")));
    }

    #[test]
    fn test_subtract_removes_dominated() {
        let small = TaintElement::declared(kind("A"));
        let big = small.join(&TaintElement::declared(kind("B")));

        let rest = big.subtract(&small);
        assert!(!rest.contains_kind(&kind("A")));
        assert!(rest.contains_kind(&kind("B")));
        assert_eq!(rest.join(&small), big);
    }
}
