//! Sharded keyed table with the oldify protocol
//!
//! Writes from many workers are serializable per key: a key lives in
//! exactly one shard, and each shard is guarded by its own lock. Batch
//! operations lock one shard at a time, bounding contention.
//!
//! Old/new protocol: `oldify_batch` atomically moves current entries into a
//! parallel old slot. During a fixpoint iteration `get_old(t)` yields the
//! previous-iteration value and `get(t)` the in-progress one; `get_or_old`
//! lets concurrent readers tolerate either. `remove_old_batch` discards the
//! snapshot once the iteration commits.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};

struct Shard<K, V> {
    current: FxHashMap<K, V>,
    old: FxHashMap<K, V>,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self {
            current: FxHashMap::default(),
            old: FxHashMap::default(),
        }
    }
}

/// Process-wide keyed store shared by fixpoint workers
pub struct ShardedTable<K, V> {
    shards: Vec<RwLock<Shard<K, V>>>,
    mask: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> ShardedTable<K, V> {
    /// Create a table with a shard count suited to `workers` writers
    pub fn with_workers(workers: usize) -> Self {
        Self::with_shards((workers.max(1) * 4).next_power_of_two())
    }

    /// Create a table with an explicit power-of-two shard count
    pub fn with_shards(shards: usize) -> Self {
        let count = shards.next_power_of_two();
        Self {
            shards: (0..count).map(|_| RwLock::new(Shard::default())).collect(),
            mask: count - 1,
        }
    }

    fn shard_of(&self, key: &K) -> &RwLock<Shard<K, V>> {
        let mut hasher = rustc_hash::FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.mask]
    }

    pub fn add(&self, key: K, value: V) {
        self.shard_of(&key).write().current.insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.shard_of(key).read().current.get(key).cloned()
    }

    pub fn get_old(&self, key: &K) -> Option<V> {
        self.shard_of(key).read().old.get(key).cloned()
    }

    /// Current value, falling back to the old slot; the read a concurrent
    /// worker performs while another worker may be mid-write on the key.
    pub fn get_or_old(&self, key: &K) -> Option<V> {
        let shard = self.shard_of(key).read();
        shard
            .current
            .get(key)
            .or_else(|| shard.old.get(key))
            .cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        let shard = self.shard_of(key).read();
        shard.current.contains_key(key) || shard.old.contains_key(key)
    }

    /// Atomically move the current entries for `keys` into the old slot.
    /// A key with no current entry leaves its old slot untouched.
    pub fn oldify_batch<'a>(&self, keys: impl IntoIterator<Item = &'a K>)
    where
        K: 'a,
    {
        for key in keys {
            let mut shard = self.shard_of(key).write();
            if let Some(value) = shard.current.remove(key) {
                shard.old.insert(key.clone(), value);
            }
        }
    }

    /// Discard the old-slot entries for `keys`
    pub fn remove_old_batch<'a>(&self, keys: impl IntoIterator<Item = &'a K>)
    where
        K: 'a,
    {
        for key in keys {
            self.shard_of(key).write().old.remove(key);
        }
    }

    pub fn remove_batch<'a>(&self, keys: impl IntoIterator<Item = &'a K>)
    where
        K: 'a,
    {
        for key in keys {
            self.shard_of(key).write().current.remove(key);
        }
    }

    /// Number of current entries
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().current.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current entries (used by persistence and cleanup)
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.read();
            out.extend(guard.current.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    /// Drop everything, both slots
    pub fn cleanup(&self) {
        for shard in &self.shards {
            let mut guard = shard.write();
            guard.current.clear();
            guard.old.clear();
        }
    }
}
