//! Dependency tracking for selective invalidation
//!
//! Every cached query result records *who read it* as a set of dependency
//! keys; an update enumerates the keys triggered by the changed entries so
//! the layers above recompute exactly their dependents.
//!
//! Keys are interned to small integers. Reader sets are kept per
//! `(table, cache key)` pair in a concurrent map; an invalidation batch is
//! collected in full before any reader set is cleared, so re-execution of
//! dependents never observes a half-invalidated registry.

use crate::shared::models::Qualifier;
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;

/// The reason a computation was requested
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyKey {
    /// Type checking the body of a define in a module
    TypeCheckDefine(Qualifier),

    /// Expansion of `from q import *` in some importer
    WildcardImport(Qualifier),

    /// Resolution of an alias name
    AliasRegister(String),

    /// A class summary read
    ClassSummary(String),

    /// An attribute-table read
    AttributeTable(String),

    /// An annotated-global read
    AnnotatedGlobal(String),

    /// Call-graph edges of a callable
    CallGraphOf(String),
}

/// Interned dependency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyId(pub u32);

/// Which cache a read went through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableTag {
    RawSource,
    ProcessedSource,
    Alias,
    ClassSummary,
    AttributeTable,
    AnnotatedGlobal,
    TypeCheck,
}

/// Interning table plus the (cache, key) → readers registry
pub struct DependencyTracker {
    ids: DashMap<DependencyKey, DependencyId>,
    keys: RwLock<Vec<DependencyKey>>,
    readers: DashMap<(TableTag, String), FxHashSet<DependencyId>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self {
            ids: DashMap::new(),
            keys: RwLock::new(Vec::new()),
            readers: DashMap::new(),
        }
    }

    /// Intern a key, returning its stable id
    pub fn register(&self, key: DependencyKey) -> DependencyId {
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        // Lock the reverse table first so an id is never published before
        // it resolves.
        let mut keys = self.keys.write();
        match self.ids.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => *entry.get(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let id = DependencyId(keys.len() as u32);
                keys.push(key);
                entry.insert(id);
                id
            }
        }
    }

    /// Resolve an interned id back to its key
    pub fn resolve(&self, id: DependencyId) -> Option<DependencyKey> {
        self.keys.read().get(id.0 as usize).cloned()
    }

    /// Record `dependency` as a reader of `(table, key)`
    pub fn read(&self, table: TableTag, key: &str, dependency: DependencyId) {
        self.readers
            .entry((table, key.to_string()))
            .or_default()
            .insert(dependency);
    }

    /// Union of the readers recorded against `(table, key)` for every key in
    /// the batch; the recorded sets are cleared afterwards. The union is
    /// collected in full before anything is cleared.
    pub fn invalidate<'a>(
        &self,
        table: TableTag,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> FxHashSet<DependencyId> {
        let keys: Vec<&str> = keys.into_iter().collect();

        let mut triggered = FxHashSet::default();
        for key in &keys {
            if let Some(entry) = self.readers.get(&(table, key.to_string())) {
                triggered.extend(entry.iter().copied());
            }
        }
        for key in &keys {
            self.readers.remove(&(table, key.to_string()));
        }
        triggered
    }

    /// Number of interned keys (telemetry)
    pub fn interned_count(&self) -> usize {
        self.keys.read().len()
    }
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_interns() {
        let tracker = DependencyTracker::new();
        let a = tracker.register(DependencyKey::WildcardImport(Qualifier::new("pkg.a")));
        let b = tracker.register(DependencyKey::WildcardImport(Qualifier::new("pkg.b")));
        let a2 = tracker.register(DependencyKey::WildcardImport(Qualifier::new("pkg.a")));

        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(
            tracker.resolve(a),
            Some(DependencyKey::WildcardImport(Qualifier::new("pkg.a")))
        );
    }

    #[test]
    fn test_invalidate_returns_readers_and_clears() {
        let tracker = DependencyTracker::new();
        let dep = tracker.register(DependencyKey::TypeCheckDefine(Qualifier::new("pkg.b")));
        tracker.read(TableTag::RawSource, "pkg.a", dep);

        let triggered = tracker.invalidate(TableTag::RawSource, ["pkg.a"]);
        assert!(triggered.contains(&dep));

        // Cleared: a second invalidation finds no readers.
        let again = tracker.invalidate(TableTag::RawSource, ["pkg.a"]);
        assert!(again.is_empty());
    }

    #[test]
    fn test_invalidation_is_per_table() {
        let tracker = DependencyTracker::new();
        let dep = tracker.register(DependencyKey::AliasRegister("A".to_string()));
        tracker.read(TableTag::Alias, "pkg.a", dep);

        let wrong_table = tracker.invalidate(TableTag::RawSource, ["pkg.a"]);
        assert!(wrong_table.is_empty());

        let right_table = tracker.invalidate(TableTag::Alias, ["pkg.a"]);
        assert!(right_table.contains(&dep));
    }

    #[test]
    fn test_batch_union() {
        let tracker = DependencyTracker::new();
        let d1 = tracker.register(DependencyKey::TypeCheckDefine(Qualifier::new("m.one")));
        let d2 = tracker.register(DependencyKey::TypeCheckDefine(Qualifier::new("m.two")));
        tracker.read(TableTag::ProcessedSource, "pkg.a", d1);
        tracker.read(TableTag::ProcessedSource, "pkg.b", d2);
        tracker.read(TableTag::ProcessedSource, "pkg.b", d1);

        let triggered = tracker.invalidate(TableTag::ProcessedSource, ["pkg.a", "pkg.b"]);
        assert_eq!(triggered.len(), 2);
        assert!(triggered.contains(&d1) && triggered.contains(&d2));
    }
}
