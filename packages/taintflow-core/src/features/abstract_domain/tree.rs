//! Path-indexed domain tree
//!
//! A recursive value `{ element, children }` mapping access paths to
//! elements of an arbitrary lattice. Taint attached at a node applies to
//! every location beneath it, so the tree is kept *minimal*: no node carries
//! an element already implied by its ancestors, and no all-bottom subtree is
//! retained.
//!
//! Matching rules:
//! - `AnyIndex` abstracts every `Field` not otherwise present.
//! - `DictionaryKeys` never matches `AnyIndex`.
//! - Reads descending through `AnyIndex` join across all specific children
//!   except `DictionaryKeys`.
//!
//! Widening is depth-parameterized: beyond the depth budget subtrees
//! collapse into the recursive join of their elements, which bounds the
//! lattice height seen by the fixpoint.

use super::lattice::AbstractLattice;
use super::path::{AccessPath, PathLabel};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Read behavior knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// When set, a `Field` read matches only an explicit `Field` child and
    /// never falls back to the `AnyIndex` child.
    pub use_precise_fields: bool,
}

/// Tree-shaped abstract value over an element lattice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainTree<E: AbstractLattice> {
    element: E,
    children: FxHashMap<PathLabel, DomainTree<E>>,
}

impl<E: AbstractLattice> Default for DomainTree<E> {
    fn default() -> Self {
        Self::bottom()
    }
}

impl<E: AbstractLattice> DomainTree<E> {
    /// The empty tree
    pub fn bottom() -> Self {
        Self {
            element: E::bottom(),
            children: FxHashMap::default(),
        }
    }

    /// A tree holding `element` at the root
    pub fn leaf(element: E) -> Self {
        Self {
            element,
            children: FxHashMap::default(),
        }
    }

    /// A tree holding `subtree` at `path`
    pub fn create(path: &AccessPath, subtree: Self) -> Self {
        let mut tree = subtree;
        for label in path.labels().iter().rev() {
            let mut children = FxHashMap::default();
            if !tree.is_bottom() {
                children.insert(label.clone(), tree);
            }
            tree = Self {
                element: E::bottom(),
                children,
            };
        }
        tree
    }

    /// A tree holding `element` at `path`
    pub fn create_leaf(path: &AccessPath, element: E) -> Self {
        Self::create(path, Self::leaf(element))
    }

    pub fn is_bottom(&self) -> bool {
        self.element.is_bottom() && self.children.is_empty()
    }

    pub fn element(&self) -> &E {
        &self.element
    }

    pub fn children(&self) -> impl Iterator<Item = (&PathLabel, &DomainTree<E>)> {
        self.children.iter()
    }

    pub fn child(&self, label: &PathLabel) -> Option<&DomainTree<E>> {
        self.children.get(label)
    }

    // ------------------------------------------------------------------
    // Join
    // ------------------------------------------------------------------

    /// Least upper bound. Minimality is restored on the result.
    pub fn join(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        let mut joined = self.join_unpruned(other);
        joined = joined.pruned(&E::bottom());
        joined.debug_check_minimal();
        joined
    }

    fn join_unpruned(&self, other: &Self) -> Self {
        let element = self.element.join(&other.element);
        let left_any = self.children.get(&PathLabel::AnyIndex);
        let right_any = other.children.get(&PathLabel::AnyIndex);

        let mut children: FxHashMap<PathLabel, DomainTree<E>> = FxHashMap::default();
        for label in self.children.keys().chain(other.children.keys()) {
            if children.contains_key(label) {
                continue;
            }
            let joined = match label {
                // A specific field on one side joins against the other
                // side's wildcard when the field is not otherwise present.
                PathLabel::Field(_) => Self::join_options(
                    self.children.get(label).or(left_any),
                    other.children.get(label).or(right_any),
                ),
                PathLabel::AnyIndex => Self::join_options(left_any, right_any),
                // Dictionary-key taint never crosses into the wildcard.
                PathLabel::DictionaryKeys => Self::join_options(
                    self.children.get(label),
                    other.children.get(label),
                ),
            };
            if let Some(child) = joined {
                children.insert(label.clone(), child);
            }
        }

        Self { element, children }
    }

    fn join_options(left: Option<&Self>, right: Option<&Self>) -> Option<Self> {
        match (left, right) {
            (Some(l), Some(r)) => Some(l.join_unpruned(r)),
            (Some(l), None) => Some(l.clone()),
            (None, Some(r)) => Some(r.clone()),
            (None, None) => None,
        }
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Tree ordering: every read of `self` is covered by the same read of
    /// `other`.
    pub fn less_or_equal(&self, other: &Self) -> bool {
        self.leq_with(other, &E::bottom())
    }

    fn leq_with(&self, other: &Self, other_ancestors: &E) -> bool {
        let other_total = other_ancestors.join(&other.element);
        if !self.element.less_or_equal(&other_total) {
            return false;
        }
        let other_any = other.children.get(&PathLabel::AnyIndex);
        for (label, child) in &self.children {
            let counterpart = match label {
                PathLabel::Field(_) => other.children.get(label).or(other_any),
                // A wildcard covers unknown fields, so only the other
                // wildcard can dominate it.
                PathLabel::AnyIndex => other_any,
                PathLabel::DictionaryKeys => other.children.get(label),
            };
            let covered = match counterpart {
                Some(sub) => child.leq_with(sub, &other_total),
                None => child.all_elements_leq(&other_total),
            };
            if !covered {
                return false;
            }
        }
        true
    }

    fn all_elements_leq(&self, bound: &E) -> bool {
        self.element.less_or_equal(bound)
            && self.children.values().all(|c| c.all_elements_leq(bound))
    }

    // ------------------------------------------------------------------
    // Widening
    // ------------------------------------------------------------------

    /// Join accelerated for fixpoint convergence: beyond `depth` levels both
    /// operands collapse into the recursive join of their elements, combined
    /// with the element-level `widen`.
    pub fn widen(&self, next: &Self, depth: usize) -> Self {
        let mut widened = self.widen_unpruned(next, depth);
        widened = widened.pruned(&E::bottom());
        widened.debug_check_minimal();
        widened
    }

    fn widen_unpruned(&self, next: &Self, depth: usize) -> Self {
        if depth == 0 {
            let collapsed_prev = self.collapse_all();
            let collapsed_next = next.collapse_all();
            return Self::leaf(collapsed_prev.widen(&collapsed_next));
        }

        let element = self.element.join(&next.element);
        let left_any = self.children.get(&PathLabel::AnyIndex);
        let right_any = next.children.get(&PathLabel::AnyIndex);

        let mut children: FxHashMap<PathLabel, DomainTree<E>> = FxHashMap::default();
        for label in self.children.keys().chain(next.children.keys()) {
            if children.contains_key(label) {
                continue;
            }
            let (left, right) = match label {
                PathLabel::Field(_) => (
                    self.children.get(label).or(left_any),
                    next.children.get(label).or(right_any),
                ),
                PathLabel::AnyIndex => (left_any, right_any),
                PathLabel::DictionaryKeys => {
                    (self.children.get(label), next.children.get(label))
                }
            };
            let bottom = Self::bottom();
            let widened = left
                .unwrap_or(&bottom)
                .widen_unpruned(right.unwrap_or(&bottom), depth - 1);
            if !widened.is_bottom() {
                children.insert(label.clone(), widened);
            }
        }

        Self { element, children }
    }

    /// Recursive join of every element in the tree
    pub fn collapse_all(&self) -> E {
        let mut acc = self.element.clone();
        for child in self.children.values() {
            acc = acc.join(&child.collapse_all());
        }
        acc
    }

    /// Keep structure down to `depth` levels; below that, subtrees join into
    /// the boundary node's element.
    pub fn collapse_to(&self, depth: usize) -> Self {
        if depth == 0 {
            return Self::leaf(self.collapse_all());
        }
        let mut children = FxHashMap::default();
        for (label, child) in &self.children {
            let collapsed = child.collapse_to(depth - 1);
            if !collapsed.is_bottom() {
                children.insert(label.clone(), collapsed);
            }
        }
        let tree = Self {
            element: self.element.clone(),
            children,
        };
        tree.pruned(&E::bottom())
    }

    /// Bound the tree by a mold: branches without a counterpart in the mold
    /// collapse into their parent's element. A `Field` branch matches the
    /// mold's explicit field or its `AnyIndex` child.
    pub fn shape(&self, mold: &Self) -> Self {
        self.shape_raw(mold).pruned(&E::bottom())
    }

    fn shape_raw(&self, mold: &Self) -> Self {
        let mold_any = mold.children.get(&PathLabel::AnyIndex);
        let mut element = self.element.clone();
        let mut children = FxHashMap::default();

        for (label, child) in &self.children {
            let counterpart = match label {
                PathLabel::Field(_) => mold.children.get(label).or(mold_any),
                PathLabel::AnyIndex => mold_any,
                PathLabel::DictionaryKeys => mold.children.get(label),
            };
            match counterpart {
                Some(sub) => {
                    let shaped = child.shape_raw(sub);
                    if !shaped.is_bottom() {
                        children.insert(label.clone(), shaped);
                    }
                }
                None => element = element.join(&child.collapse_all()),
            }
        }

        Self { element, children }
    }

    // ------------------------------------------------------------------
    // Assign / read
    // ------------------------------------------------------------------

    /// Write `subtree` at `path`. A strong assignment replaces the existing
    /// subtree; a weak one joins into it. Descending through `AnyIndex`
    /// forces weak semantics, since the concrete index is unknown.
    pub fn assign(&self, path: &AccessPath, subtree: &Self, weak: bool) -> Self {
        let assigned = self.assign_raw(path.labels(), subtree, weak);
        let pruned = assigned.pruned(&E::bottom());
        pruned.debug_check_minimal();
        pruned
    }

    fn assign_raw(&self, labels: &[PathLabel], subtree: &Self, weak: bool) -> Self {
        let Some((label, rest)) = labels.split_first() else {
            return if weak {
                self.join_unpruned(subtree)
            } else {
                subtree.clone()
            };
        };

        let weak_below = weak || matches!(label, PathLabel::AnyIndex);
        let existing = self.children.get(label).cloned().unwrap_or_default();
        let new_child = existing.assign_raw(rest, subtree, weak_below);

        let mut children = self.children.clone();
        if new_child.is_bottom() {
            children.remove(label);
        } else {
            children.insert(label.clone(), new_child);
        }
        Self {
            element: self.element.clone(),
            children,
        }
    }

    /// Read the subtree at `path`, folding the ancestor elements along the
    /// path into the result's root element.
    pub fn read(&self, path: &AccessPath) -> Self {
        self.read_with(path, ReadOptions::default())
    }

    pub fn read_with(&self, path: &AccessPath, options: ReadOptions) -> Self {
        let mut ancestors = E::bottom();
        let subtree = self.read_raw(path.labels(), &mut ancestors, options);
        if ancestors.is_bottom() {
            return subtree;
        }
        let mut result = subtree;
        result.element = result.element.join(&ancestors);
        let result = result.pruned(&E::bottom());
        result.debug_check_minimal();
        result
    }

    fn read_raw(&self, labels: &[PathLabel], ancestors: &mut E, options: ReadOptions) -> Self {
        let Some((label, rest)) = labels.split_first() else {
            return self.clone();
        };
        *ancestors = ancestors.join(&self.element);

        match label {
            PathLabel::Field(_) => {
                let child = if options.use_precise_fields {
                    self.children.get(label)
                } else {
                    self.children
                        .get(label)
                        .or_else(|| self.children.get(&PathLabel::AnyIndex))
                };
                match child {
                    Some(sub) => sub.read_raw(rest, ancestors, options),
                    None => Self::bottom(),
                }
            }
            PathLabel::AnyIndex => {
                // A wildcard read sees every specific field except the
                // dictionary keys.
                let mut joined = Self::bottom();
                for (child_label, child) in &self.children {
                    if matches!(child_label, PathLabel::DictionaryKeys) {
                        continue;
                    }
                    joined = joined.join_unpruned(child);
                }
                joined.read_raw(rest, ancestors, options)
            }
            PathLabel::DictionaryKeys => match self.children.get(label) {
                Some(sub) => sub.read_raw(rest, ancestors, options),
                None => Self::bottom(),
            },
        }
    }

    // ------------------------------------------------------------------
    // Transformation / traversal
    // ------------------------------------------------------------------

    /// Leaf-wise map over the element domain (breadcrumb application and
    /// kind filtering go through here). Minimality is restored afterwards.
    pub fn transform(&self, f: &impl Fn(&E) -> E) -> Self {
        self.transform_raw(f).pruned(&E::bottom())
    }

    fn transform_raw(&self, f: &impl Fn(&E) -> E) -> Self {
        let mut children = FxHashMap::default();
        for (label, child) in &self.children {
            let mapped = child.transform_raw(f);
            if !mapped.is_bottom() {
                children.insert(label.clone(), mapped);
            }
        }
        Self {
            element: f(&self.element),
            children,
        }
    }

    /// Visit every node as `(path, element)`, pre-order
    pub fn fold<F: FnMut(&AccessPath, &E)>(&self, f: &mut F) {
        self.fold_raw(&AccessPath::root(), f);
    }

    fn fold_raw<F: FnMut(&AccessPath, &E)>(&self, path: &AccessPath, f: &mut F) {
        f(path, &self.element);
        for (label, child) in &self.children {
            child.fold_raw(&path.child(label.clone()), f);
        }
    }

    /// Greatest depth of any non-bottom node
    pub fn depth(&self) -> usize {
        self.children
            .values()
            .map(|c| 1 + c.depth())
            .max()
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Minimality
    // ------------------------------------------------------------------

    fn pruned(&self, ancestors: &E) -> Self {
        let element = self.element.subtract(ancestors);
        let below = ancestors.join(&element);
        let mut children = FxHashMap::default();
        for (label, child) in &self.children {
            let pruned = child.pruned(&below);
            if !pruned.is_bottom() {
                children.insert(label.clone(), pruned);
            }
        }
        Self { element, children }
    }

    /// Whether the minimality invariant holds
    pub fn is_minimal(&self) -> bool {
        self.is_minimal_with(&E::bottom())
    }

    fn is_minimal_with(&self, ancestors: &E) -> bool {
        if self.is_bottom() {
            return true;
        }
        // A non-root all-bottom subtree would have been dropped; a dominated
        // element must have been subtracted away.
        if !ancestors.is_bottom()
            && !self.element.is_bottom()
            && self.element.less_or_equal(ancestors)
        {
            return false;
        }
        let below = ancestors.join(&self.element);
        self.children
            .values()
            .all(|c| !c.is_bottom() && c.is_minimal_with(&below))
    }

    #[cfg(feature = "strict-invariants")]
    fn debug_check_minimal(&self) {
        assert!(
            self.is_minimal(),
            "domain tree invariant violated: non-minimal post-state"
        );
    }

    #[cfg(not(feature = "strict-invariants"))]
    fn debug_check_minimal(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::abstract_domain::SetLattice;

    type Tree = DomainTree<SetLattice<u32>>;

    fn set(values: impl IntoIterator<Item = u32>) -> SetLattice<u32> {
        SetLattice::from_iter(values)
    }

    fn path(labels: &[PathLabel]) -> AccessPath {
        AccessPath::new(labels.to_vec())
    }

    fn field(name: &str) -> PathLabel {
        PathLabel::field(name)
    }

    #[test]
    fn test_bottom_and_leaf() {
        assert!(Tree::bottom().is_bottom());
        assert!(!Tree::leaf(set([1])).is_bottom());
        assert!(Tree::leaf(SetLattice::bottom()).is_bottom());
    }

    #[test]
    fn test_join_lattice_laws() {
        let x = Tree::create_leaf(&path(&[field("a")]), set([1]));
        let y = Tree::create_leaf(&path(&[field("b")]), set([2]));

        assert_eq!(x.join(&x), x);
        assert_eq!(x.join(&y), y.join(&x));
        assert!(x.less_or_equal(&x.join(&y)));
        assert!(y.less_or_equal(&x.join(&y)));
    }

    #[test]
    fn test_join_restores_minimality() {
        let root = Tree::leaf(set([1]));
        let nested = Tree::create_leaf(&path(&[field("a")]), set([1]));

        // The nested element is dominated by the root element after join.
        let joined = root.join(&nested);
        assert_eq!(joined, Tree::leaf(set([1])));
        assert!(joined.is_minimal());
    }

    #[test]
    fn test_join_field_against_wildcard() {
        let specific = Tree::create_leaf(&path(&[field("x")]), set([1]));
        let wildcard = Tree::create_leaf(&path(&[PathLabel::AnyIndex]), set([2]));

        let joined = specific.join(&wildcard);

        // The specific field picks up the other side's wildcard taint.
        let read_x = joined.read(&path(&[field("x")]));
        assert_eq!(read_x.element(), &set([1, 2]));

        // An unrelated field is still covered by the wildcard alone.
        let read_other = joined.read(&path(&[field("other")]));
        assert_eq!(read_other.element(), &set([2]));
    }

    #[test]
    fn test_dictionary_keys_disjoint_from_wildcard() {
        let keys = Tree::create_leaf(&path(&[PathLabel::DictionaryKeys]), set([7]));

        // `[*]` never matches dictionary-key taint.
        let read_any = keys.read(&path(&[PathLabel::AnyIndex]));
        assert!(read_any.is_bottom());

        let read_keys = keys.read(&path(&[PathLabel::DictionaryKeys]));
        assert_eq!(read_keys.element(), &set([7]));
    }

    #[test]
    fn test_anyindex_read_matches_any_field() {
        let tree = Tree::create_leaf(&path(&[PathLabel::AnyIndex]), set([3]));

        let via_field = tree.read(&path(&[field("whatever")]));
        assert_eq!(via_field.element(), &set([3]));

        let precise = tree.read_with(
            &path(&[field("whatever")]),
            ReadOptions {
                use_precise_fields: true,
            },
        );
        assert!(precise.is_bottom());
    }

    #[test]
    fn test_wildcard_read_joins_specific_children() {
        let tree = Tree::create_leaf(&path(&[field("a")]), set([1]))
            .join(&Tree::create_leaf(&path(&[field("b")]), set([2])))
            .join(&Tree::create_leaf(&path(&[PathLabel::DictionaryKeys]), set([9])));

        let read = tree.read(&path(&[PathLabel::AnyIndex]));
        assert_eq!(read.element(), &set([1, 2]));
    }

    #[test]
    fn test_assign_strong_replaces() {
        let tree = Tree::create_leaf(&path(&[field("a")]), set([1]));
        let assigned = tree.assign(&path(&[field("a")]), &Tree::leaf(set([2])), false);

        assert_eq!(assigned.read(&path(&[field("a")])).element(), &set([2]));
    }

    #[test]
    fn test_assign_weak_joins() {
        let tree = Tree::create_leaf(&path(&[field("a")]), set([1]));
        let assigned = tree.assign(&path(&[field("a")]), &Tree::leaf(set([2])), true);

        assert_eq!(assigned.read(&path(&[field("a")])).element(), &set([1, 2]));
    }

    #[test]
    fn test_assign_through_wildcard_is_weak() {
        let tree = Tree::create_leaf(&path(&[PathLabel::AnyIndex, field("f")]), set([1]));
        let assigned = tree.assign(
            &path(&[PathLabel::AnyIndex, field("f")]),
            &Tree::leaf(set([2])),
            false,
        );

        // The strong update degrades to a join: the concrete index is
        // unknown, so the old value cannot be killed.
        let read = assigned.read(&path(&[field("x"), field("f")]));
        assert_eq!(read.element(), &set([1, 2]));
    }

    #[test]
    fn test_path_round_trip() {
        let p = path(&[field("a"), field("b")]);
        let sub = Tree::leaf(set([5]));
        let tree = Tree::leaf(set([1])).assign(&p, &sub, false);

        // read(assign(t, p, s), p) = join(ancestors at p, s)
        let read = tree.read(&p);
        assert_eq!(read.element(), &set([1, 5]));
    }

    #[test]
    fn test_widen_collapses_below_depth() {
        let deep = Tree::create_leaf(
            &path(&[field("a"), field("b"), field("c"), field("d")]),
            set([4]),
        );
        let widened = Tree::bottom().widen(&deep, 2);

        assert!(widened.depth() <= 2);
        // Taint is never lost, only coarsened.
        assert!(deep.less_or_equal(&widened));
    }

    #[test]
    fn test_widen_is_upper_bound() {
        let prev = Tree::create_leaf(&path(&[field("a")]), set([1]));
        let next = Tree::create_leaf(&path(&[field("a"), field("b")]), set([2]));
        let widened = prev.widen(&next, 4);

        assert!(prev.less_or_equal(&widened));
        assert!(next.less_or_equal(&widened));
    }

    #[test]
    fn test_widen_mismatched_wildcard_depths() {
        // One operand holds a shallow wildcard, the other a deeper one;
        // widening at depth 1 collapses both into joined elements.
        let shallow = Tree::create_leaf(&path(&[PathLabel::AnyIndex]), set([1]));
        let deep = Tree::create_leaf(&path(&[field("x"), PathLabel::AnyIndex]), set([2]));

        let widened = shallow.widen(&deep, 1);
        assert!(widened.depth() <= 1);
        assert!(shallow.less_or_equal(&widened));
        assert!(deep.less_or_equal(&widened));
    }

    #[test]
    fn test_collapse_to() {
        let tree = Tree::create_leaf(&path(&[field("a"), field("b")]), set([2]))
            .join(&Tree::create_leaf(&path(&[field("a")]), set([1])));

        let collapsed = tree.collapse_to(1);
        assert!(collapsed.depth() <= 1);
        assert_eq!(collapsed.read(&path(&[field("a")])).element(), &set([1, 2]));
    }

    #[test]
    fn test_shape_collapses_unmolded_branches() {
        let tree = Tree::create_leaf(&path(&[field("keep"), field("deep")]), set([1]))
            .join(&Tree::create_leaf(&path(&[field("drop")]), set([2])));
        let mold = Tree::create_leaf(&path(&[field("keep")]), set([0]));

        let shaped = tree.shape(&mold);

        // The unmolded branch folds into the root element.
        assert_eq!(shaped.element(), &set([2]));
        // The molded branch survives but only to the mold's depth.
        assert!(shaped.child(&field("keep")).is_some());
        assert!(tree.less_or_equal(&shaped));
    }

    #[test]
    fn test_transform_renormalizes() {
        let tree = Tree::leaf(set([1])).assign(&path(&[field("a")]), &Tree::leaf(set([2])), false);

        // Mapping everything to the same element leaves only the root.
        let mapped = tree.transform(&|_| set([9]));
        assert_eq!(mapped, Tree::leaf(set([9])));
        assert!(mapped.is_minimal());
    }

    #[test]
    fn test_fold_visits_paths() {
        let tree = Tree::create_leaf(&path(&[field("a"), field("b")]), set([1]));
        let mut seen = Vec::new();
        tree.fold(&mut |p, e| {
            if !e.is_bottom() {
                seen.push(p.to_string());
            }
        });

        assert_eq!(seen, vec!["[a][b]".to_string()]);
    }
}
