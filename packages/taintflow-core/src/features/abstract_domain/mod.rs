//! Path-indexed abstract domains
//!
//! The value shape at every node of the taint model: a tree mapping access
//! paths to elements of an arbitrary lattice, kept minimal under join,
//! widening, assignment and read.

mod lattice;
mod path;
mod tree;

pub use lattice::{AbstractLattice, SetLattice};
pub use path::{AccessPath, PathLabel};
pub use tree::{DomainTree, ReadOptions};
