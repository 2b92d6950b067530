//! Propagation-node registry
//!
//! The durable heart of the coordinator: a single-mutex table of every
//! relay node ever discovered or selected, the operator settings, the
//! active-node selection and their persistence to one JSON file.
//!
//! Nodes are created on first announce or explicit selection, updated
//! on every later announce, and never deleted.

mod registry;
mod store;
mod types;

pub use registry::NodeRegistry;
pub use store::{PersistedState, PersistenceStore, StoreError, StoreResult};
pub use types::{
    NodeCapability, NodeCounts, PropagationNode, Settings, UpsertOutcome, MIN_SYNC_INTERVAL_SECS,
};
