//! Interprocedural fixpoint
//!
//! The work-list driver that iterates the analyzers over all targets
//! through the shared-memory tables until models stop moving.

mod driver;
mod state;

pub use driver::{
    FixpointConfig, FixpointDriver, FixpointOutcome, SharedModelsHandle, SharedResultsHandle,
};
pub use state::FixpointState;
