//! Trace info
//!
//! Where a piece of taint came from: declared on the leaf itself, or
//! observed through a call site at some distance from the declaration.
//! Joins keep the shortest witness per callee so trace sets stay bounded
//! under widening.

use crate::shared::models::Span;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TraceInfo {
    /// The model declaration itself introduced the taint
    Declaration {
        /// Whether the user named the leaf in the declaration
        leaf_name_provided: bool,
    },

    /// The taint was observed flowing through a call
    CallSite {
        callee: String,
        span: Span,

        /// Call-graph distance from the declaration
        distance: u32,
    },
}

impl TraceInfo {
    pub fn declaration() -> Self {
        TraceInfo::Declaration {
            leaf_name_provided: false,
        }
    }

    pub fn call_site(callee: impl Into<String>, span: Span, distance: u32) -> Self {
        TraceInfo::CallSite {
            callee: callee.into(),
            span,
            distance,
        }
    }

    pub fn distance(&self) -> u32 {
        match self {
            TraceInfo::Declaration { .. } => 0,
            TraceInfo::CallSite { distance, .. } => *distance,
        }
    }

    /// One more hop away from the declaration
    pub fn extended_through(&self, callee: &str, span: Span) -> TraceInfo {
        TraceInfo::CallSite {
            callee: callee.to_string(),
            span,
            distance: self.distance().saturating_add(1),
        }
    }
}

/// Canonicalize a joined trace set: at most one `Declaration` (flags OR-ed)
/// and the shortest witness per callee.
pub(crate) fn canonicalize(traces: BTreeSet<TraceInfo>) -> BTreeSet<TraceInfo> {
    let mut declaration: Option<bool> = None;
    let mut best: std::collections::BTreeMap<String, (u32, Span)> =
        std::collections::BTreeMap::new();

    for trace in traces {
        match trace {
            TraceInfo::Declaration { leaf_name_provided } => {
                declaration = Some(declaration.unwrap_or(false) || leaf_name_provided);
            }
            TraceInfo::CallSite {
                callee,
                span,
                distance,
            } => {
                best.entry(callee)
                    .and_modify(|entry| {
                        if (distance, span) < *entry {
                            *entry = (distance, span);
                        }
                    })
                    .or_insert((distance, span));
            }
        }
    }

    let mut out = BTreeSet::new();
    if let Some(leaf_name_provided) = declaration {
        out.insert(TraceInfo::Declaration { leaf_name_provided });
    }
    for (callee, (distance, span)) in best {
        out.insert(TraceInfo::CallSite {
            callee,
            span,
            distance,
        });
    }
    out
}

/// Is `left` covered by `right` for ordering purposes?
pub(crate) fn covered_by(left: &TraceInfo, right: &TraceInfo) -> bool {
    match (left, right) {
        (
            TraceInfo::Declaration {
                leaf_name_provided: l,
            },
            TraceInfo::Declaration {
                leaf_name_provided: r,
            },
        ) => !l || *r,
        (
            TraceInfo::CallSite {
                callee: lc,
                distance: ld,
                ..
            },
            TraceInfo::CallSite {
                callee: rc,
                distance: rd,
                ..
            },
        ) => lc == rc && rd <= ld,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_keeps_shortest_per_callee() {
        let traces: BTreeSet<TraceInfo> = [
            TraceInfo::call_site("m.f", Span::zero(), 3),
            TraceInfo::call_site("m.f", Span::new(1, 0, 1, 5), 1),
            TraceInfo::call_site("m.g", Span::zero(), 2),
        ]
        .into_iter()
        .collect();

        let canonical = canonicalize(traces);
        assert_eq!(canonical.len(), 2);
        assert!(canonical.contains(&TraceInfo::call_site("m.f", Span::new(1, 0, 1, 5), 1)));
    }

    #[test]
    fn test_canonicalize_merges_declarations() {
        let traces: BTreeSet<TraceInfo> = [
            TraceInfo::Declaration {
                leaf_name_provided: false,
            },
            TraceInfo::Declaration {
                leaf_name_provided: true,
            },
        ]
        .into_iter()
        .collect();

        let canonical = canonicalize(traces);
        assert_eq!(canonical.len(), 1);
        assert!(canonical.contains(&TraceInfo::Declaration {
            leaf_name_provided: true
        }));
    }

    #[test]
    fn test_extension_increments_distance() {
        let declared = TraceInfo::declaration();
        let once = declared.extended_through("m.f", Span::zero());
        assert_eq!(once.distance(), 1);
        let twice = once.extended_through("m.g", Span::zero());
        assert_eq!(twice.distance(), 2);
    }
}
