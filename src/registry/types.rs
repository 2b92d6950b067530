//! Registry types and settings

use crate::transport::NodeHash;
use serde::{Deserialize, Serialize};

/// Minimum accepted auto-sync interval, in seconds
pub const MIN_SYNC_INTERVAL_SECS: u64 = 30;

/// Capability data a propagation node advertises in its announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapability {
    pub timebase: u64,
    pub enabled: bool,
    pub per_transfer_limit: u64,
}

/// One known propagation node.
///
/// `index` is assigned exactly once when the node is first created and
/// is never reused, so operators can keep referring to `set 3` across
/// restarts. `enabled` is tri-state: `None` until a capability payload
/// has been decoded for this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationNode {
    pub display_name: String,
    pub index: u32,

    /// UNIX seconds of the last announce, 0 for never-seen placeholders
    pub last_seen: i64,

    pub hash: NodeHash,
    pub identity_hash: String,
    pub operator_name: Option<String>,
    pub enabled: Option<bool>,
    pub per_transfer_limit: Option<u64>,
}

impl PropagationNode {
    /// Entry for a node selected by hash before any announce was seen.
    pub fn placeholder(hash: NodeHash, index: u32) -> Self {
        Self {
            display_name: format!("PropNode-{}", hash.tag()),
            index,
            last_seen: 0,
            hash,
            identity_hash: String::new(),
            operator_name: None,
            enabled: None,
            per_transfer_limit: None,
        }
    }

    pub fn operator_label(&self) -> &str {
        self.operator_name.as_deref().unwrap_or("Unknown")
    }

    pub fn capability_label(&self) -> &'static str {
        match self.enabled {
            Some(true) => "ENABLED",
            Some(false) => "DISABLED",
            None => "UNKNOWN",
        }
    }
}

/// Outcome of one registry upsert
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub node: PropagationNode,
    pub is_new: bool,
}

/// Node totals broken down by advertised capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub unknown: usize,
}

/// Operator-tunable plugin settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub enabled: bool,
    pub auto_sync_enabled: bool,
    pub auto_sync_interval_secs: u64,
    pub auto_retry_failed: bool,
    pub show_discovery: bool,
    pub last_synced_at: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_sync_enabled: true,
            auto_sync_interval_secs: 300,
            auto_retry_failed: true,
            show_discovery: false,
            last_synced_at: None,
        }
    }
}
