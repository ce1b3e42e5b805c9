//! Persisted model heap
//!
//! The analyze pipeline can save the model table between runs. Snapshots
//! are msgpack-framed and tagged with the driver epoch; a snapshot whose
//! epoch does not match the expected one is rejected as stale rather than
//! silently loaded.

use super::table::ShardedTable;
use crate::errors::{Result, TaintflowError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct SnapshotFile<K, V> {
    epoch: u32,
    entries: Vec<(K, V)>,
}

/// Serialize the table's current entries to `path`, tagged with `epoch`
pub fn save_snapshot<K, V>(table: &ShardedTable<K, V>, path: &Path, epoch: u32) -> Result<()>
where
    K: Hash + Eq + Clone + Serialize,
    V: Clone + Serialize,
{
    let file = SnapshotFile {
        epoch,
        entries: table.entries(),
    };
    let bytes = rmp_serde::to_vec(&file)
        .map_err(|e| TaintflowError::Serialization(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Load a snapshot saved by [`save_snapshot`] into a fresh table.
///
/// Fails with [`TaintflowError::StaleSnapshot`] when the stored epoch does
/// not match `expected_epoch`.
pub fn load_snapshot<K, V>(
    path: &Path,
    expected_epoch: u32,
    workers: usize,
) -> Result<ShardedTable<K, V>>
where
    K: Hash + Eq + Clone + DeserializeOwned,
    V: Clone + DeserializeOwned,
{
    let bytes = std::fs::read(path)?;
    let file: SnapshotFile<K, V> = rmp_serde::from_slice(&bytes)
        .map_err(|e| TaintflowError::Serialization(e.to_string()))?;
    if file.epoch != expected_epoch {
        return Err(TaintflowError::StaleSnapshot {
            expected: expected_epoch,
            found: file.epoch,
        });
    }
    let table = ShardedTable::with_workers(workers);
    for (key, value) in file.entries {
        table.add(key, value);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.bin");

        let table: ShardedTable<String, u32> = ShardedTable::with_shards(4);
        table.add("pkg.f".to_string(), 41);
        table.add("pkg.g".to_string(), 42);

        save_snapshot(&table, &path, 7).unwrap();
        let loaded: ShardedTable<String, u32> = load_snapshot(&path, 7, 2).unwrap();

        assert_eq!(loaded.get(&"pkg.f".to_string()), Some(41));
        assert_eq!(loaded.get(&"pkg.g".to_string()), Some(42));
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_stale_epoch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.bin");

        let table: ShardedTable<String, u32> = ShardedTable::with_shards(4);
        table.add("pkg.f".to_string(), 1);
        save_snapshot(&table, &path, 3).unwrap();

        let result: Result<ShardedTable<String, u32>> = load_snapshot(&path, 4, 2);
        assert!(matches!(
            result,
            Err(TaintflowError::StaleSnapshot {
                expected: 4,
                found: 3
            })
        ));
    }
}
