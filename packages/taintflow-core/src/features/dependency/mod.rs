//! Dependency keys and the read-tracking registry

mod tracker;

pub use tracker::{DependencyId, DependencyKey, DependencyTracker, TableTag};
