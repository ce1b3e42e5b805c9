//! Property tests for the domain-tree algebra
//!
//! The lattice laws and structural invariants every public tree operation
//! must preserve, exercised over randomized small trees.

use proptest::prelude::*;
use taintflow_core::features::abstract_domain::{
    AbstractLattice, AccessPath, DomainTree, PathLabel, SetLattice,
};

type Elem = SetLattice<u32>;
type Tree = DomainTree<Elem>;

fn label_strategy() -> impl Strategy<Value = PathLabel> {
    prop_oneof![
        (0u32..4).prop_map(|i| PathLabel::field(format!("f{i}"))),
        Just(PathLabel::AnyIndex),
        Just(PathLabel::DictionaryKeys),
    ]
}

fn path_strategy() -> impl Strategy<Value = AccessPath> {
    prop::collection::vec(label_strategy(), 0..4).prop_map(AccessPath::new)
}

fn element_strategy() -> impl Strategy<Value = Elem> {
    prop::collection::hash_set(0u32..8, 0..4)
        .prop_map(|values| SetLattice::from_iter(values))
}

/// Trees built from a handful of weak assignments, which is how every
/// tree in the analysis comes to exist.
fn tree_strategy() -> impl Strategy<Value = Tree> {
    prop::collection::vec((path_strategy(), element_strategy()), 0..5).prop_map(|writes| {
        let mut tree = Tree::bottom();
        for (path, element) in writes {
            tree = tree.assign(&path, &Tree::leaf(element), true);
        }
        tree
    })
}

proptest! {
    /// join(x, x) = x
    #[test]
    fn join_idempotent(tree in tree_strategy()) {
        prop_assert_eq!(tree.join(&tree), tree);
    }

    /// join(x, y) = join(y, x)
    #[test]
    fn join_commutative(left in tree_strategy(), right in tree_strategy()) {
        prop_assert_eq!(left.join(&right), right.join(&left));
    }

    /// x ≤ join(x, y) and y ≤ join(x, y)
    #[test]
    fn join_is_upper_bound(left in tree_strategy(), right in tree_strategy()) {
        let joined = left.join(&right);
        prop_assert!(left.less_or_equal(&joined));
        prop_assert!(right.less_or_equal(&joined));
    }

    /// Every public operation leaves the tree minimal
    #[test]
    fn operations_preserve_minimality(
        left in tree_strategy(),
        right in tree_strategy(),
        path in path_strategy(),
        depth in 0usize..4,
    ) {
        prop_assert!(left.join(&right).is_minimal());
        prop_assert!(left.widen(&right, depth).is_minimal());
        prop_assert!(left.assign(&path, &right, false).is_minimal());
        prop_assert!(left.assign(&path, &right, true).is_minimal());
        prop_assert!(left.collapse_to(depth).is_minimal());
        prop_assert!(left.shape(&right).is_minimal());
    }

    /// widen(prev, next, d) ≥ prev and ≥ next
    #[test]
    fn widen_is_upper_bound(
        prev in tree_strategy(),
        next in tree_strategy(),
        depth in 0usize..4,
    ) {
        let widened = prev.widen(&next, depth);
        prop_assert!(prev.less_or_equal(&widened));
        prop_assert!(next.less_or_equal(&widened));
    }

    /// Widening bounds the tree depth
    #[test]
    fn widen_bounds_depth(
        prev in tree_strategy(),
        next in tree_strategy(),
        depth in 0usize..4,
    ) {
        prop_assert!(prev.widen(&next, depth).depth() <= depth);
    }

    /// read(assign(t, p, s), p) covers join(ancestors, s)
    #[test]
    fn path_round_trip(
        tree in tree_strategy(),
        path in path_strategy(),
        element in element_strategy(),
    ) {
        let leaf = Tree::leaf(element);
        let assigned = tree.assign(&path, &leaf, false);
        let read = assigned.read(&path);
        prop_assert!(leaf.less_or_equal(&read));
    }

    /// An AnyIndex-only tree answers any specific field read
    #[test]
    fn anyindex_matches_every_field(element in element_strategy(), name in "[a-z]{1,6}") {
        prop_assume!(!element.is_bottom());
        let tree = Tree::create_leaf(
            &AccessPath::new(vec![PathLabel::AnyIndex]),
            element.clone(),
        );
        let read = tree.read(&AccessPath::new(vec![PathLabel::field(name)]));
        prop_assert_eq!(read.element(), &element);
    }

    /// Collapsing never loses taint, only precision
    #[test]
    fn collapse_is_sound(tree in tree_strategy(), depth in 0usize..3) {
        prop_assert!(tree.less_or_equal(&tree.collapse_to(depth)));
    }
}
