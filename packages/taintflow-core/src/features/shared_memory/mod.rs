//! Keyed shared-memory tables
//!
//! The sole writable cross-worker state. A sharded map supporting the
//! old/new dual-slot protocol (`oldify`) that gives fixpoint workers an
//! MVCC-style consistent view of the previous iteration while the current
//! one is being written.

mod snapshot;
mod table;

pub use snapshot::{load_snapshot, save_snapshot};
pub use table::ShardedTable;
