//! Join/widen throughput of the path-indexed domain tree

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use taintflow_core::features::abstract_domain::{
    AccessPath, DomainTree, PathLabel, SetLattice,
};

type Tree = DomainTree<SetLattice<u32>>;

fn wide_tree(fields: u32, seed: u32) -> Tree {
    let mut tree = Tree::bottom();
    for i in 0..fields {
        let path = AccessPath::new(vec![
            PathLabel::field(format!("f{i}")),
            PathLabel::field(format!("g{}", i % 7)),
        ]);
        tree = tree.assign(
            &path,
            &Tree::leaf(SetLattice::from_iter([seed + i])),
            true,
        );
    }
    tree
}

fn bench_join(c: &mut Criterion) {
    let left = wide_tree(64, 0);
    let right = wide_tree(64, 1000);
    c.bench_function("domain_tree_join_64x64", |b| {
        b.iter(|| black_box(left.join(&right)))
    });
}

fn bench_widen(c: &mut Criterion) {
    let prev = wide_tree(64, 0);
    let next = wide_tree(64, 1000);
    c.bench_function("domain_tree_widen_depth2", |b| {
        b.iter(|| black_box(prev.widen(&next, 2)))
    });
}

fn bench_read(c: &mut Criterion) {
    let tree = wide_tree(64, 0);
    let path = AccessPath::new(vec![PathLabel::field("f13"), PathLabel::field("g6")]);
    c.bench_function("domain_tree_read", |b| b.iter(|| black_box(tree.read(&path))));
}

criterion_group!(benches, bench_join, bench_widen, bench_read);
criterion_main!(benches);
