//! Message pickup from the active propagation node
//!
//! A sync session walks the transport's transfer states from `Idle` to
//! `Complete` (or one of the enumerated failure states), watched by an
//! independent polling task. The scheduler fires sessions periodically;
//! the `sync` command fires them on demand. Both share the same engine.

mod engine;
mod scheduler;
mod types;

pub use engine::{SyncEngine, SyncOutcome, SYNC_PATH_WAIT, WATCH_INTERVAL, WATCH_TIMEOUT};
pub use scheduler::{SyncScheduler, INITIAL_SYNC_DELAY};
pub use types::{SyncSnapshot, SyncState};
