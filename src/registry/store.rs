//! Durable load/save of the registry and settings
//!
//! Persistence is strictly best-effort: a failed save leaves state
//! in-memory-correct and the next successful save repairs the file, so
//! no I/O error here may ever reach the host process.

use crate::registry::types::{PropagationNode, Settings};
use crate::transport::NodeHash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not replace state file: {0}")]
    Replace(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that survives a restart
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub nodes: HashMap<NodeHash, PropagationNode>,
    pub next_index: u32,
    pub active: Option<NodeHash>,
    pub settings: Settings,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            next_index: 1,
            active: None,
            settings: Settings::default(),
        }
    }
}

/// On-disk document. Hashes are stored as raw strings and normalized
/// again on load, so hand-edited or legacy files keep working.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    active_node: Option<String>,
    #[serde(default)]
    enabled: bool,
    #[serde(default = "default_true")]
    auto_sync_enabled: bool,
    #[serde(default = "default_interval")]
    auto_sync_interval: u64,
    #[serde(default = "default_true")]
    auto_retry_failed: bool,
    #[serde(default)]
    show_discovery: bool,
    #[serde(default)]
    last_synced_at: Option<i64>,
    #[serde(default)]
    nodes: HashMap<String, PropagationNode>,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    300
}

pub struct PersistenceStore {
    path: PathBuf,
}

impl PersistenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted state, falling back to defaults on a missing
    /// file or any parse error. `next_index` is reconstructed as
    /// `max(stored indices) + 1` so indices are never reused.
    pub fn load(&self) -> PersistedState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), "no persisted state loaded: {e}");
                return PersistedState::default();
            }
        };

        let file: StateFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), "discarding unreadable state file: {e}");
                return PersistedState::default();
            }
        };

        let mut nodes = HashMap::new();
        let mut max_index = 0;
        for (key, mut node) in file.nodes {
            let hash = match NodeHash::parse(&key) {
                Ok(hash) => hash,
                Err(_) => {
                    warn!("dropping persisted node with invalid hash {key:?}");
                    continue;
                }
            };
            node.hash = hash.clone();
            max_index = max_index.max(node.index);
            nodes.insert(hash, node);
        }

        let active = file
            .active_node
            .as_deref()
            .and_then(|raw| NodeHash::parse(raw).ok());

        PersistedState {
            nodes,
            next_index: max_index + 1,
            active,
            settings: Settings {
                enabled: file.enabled,
                auto_sync_enabled: file.auto_sync_enabled,
                auto_sync_interval_secs: file.auto_sync_interval,
                auto_retry_failed: file.auto_retry_failed,
                show_discovery: file.show_discovery,
                last_synced_at: file.last_synced_at,
            },
        }
    }

    /// Serialize to a temp file in the target directory, then
    /// atomically replace the target. Readers either see the old
    /// committed state or the new one, never a partial write.
    pub fn save(&self, state: &PersistedState) -> StoreResult<()> {
        let file = StateFile {
            active_node: state.active.as_ref().map(|h| h.to_string()),
            enabled: state.settings.enabled,
            auto_sync_enabled: state.settings.auto_sync_enabled,
            auto_sync_interval: state.settings.auto_sync_interval_secs,
            auto_retry_failed: state.settings.auto_retry_failed,
            show_discovery: state.settings.show_discovery,
            last_synced_at: state.settings.last_synced_at,
            nodes: state
                .nodes
                .iter()
                .map(|(hash, node)| (hash.to_string(), node.clone()))
                .collect(),
        };

        let serialized = serde_json::to_vec_pretty(&file)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&serialized)?;
        temp.persist(&self.path)
            .map_err(|e| StoreError::Replace(e.to_string()))?;

        Ok(())
    }

    /// Save, swallowing any error after logging it. This is the call
    /// sites' default: persistence must never take down the host.
    pub fn save_best_effort(&self, state: &PersistedState) {
        if let Err(e) = self.save(state) {
            warn!(path = %self.path.display(), "state save failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::types::NodeCapability;
    use crate::registry::NodeRegistry;

    fn hash(s: &str) -> NodeHash {
        NodeHash::parse(s).unwrap()
    }

    fn store_in(dir: &Path) -> PersistenceStore {
        PersistenceStore::new(dir.join("prop_nodes.json"))
    }

    fn populated_registry(count: usize) -> NodeRegistry {
        let registry = NodeRegistry::new();
        for i in 0..count {
            registry.upsert(
                &hash(&format!("aa{i:02x}")),
                &format!("id-{i}"),
                (i % 2 == 0).then(|| format!("op-{i}")),
                Some(NodeCapability {
                    timebase: 1_700_000_000,
                    enabled: i % 2 == 0,
                    per_transfer_limit: 1000 + i as u64,
                }),
            );
        }
        registry
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = store_in(dir.path()).load();
        assert!(state.nodes.is_empty());
        assert_eq!(state.next_index, 1);
        assert!(state.active.is_none());
        assert_eq!(state.settings, Settings::default());
    }

    #[test]
    fn round_trip_for_empty_one_and_many() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        for count in [0usize, 1, 12] {
            let registry = populated_registry(count);
            if count > 0 {
                registry.set_active(hash("aa00"));
            }
            registry.update_settings(|s| {
                s.enabled = true;
                s.auto_sync_interval_secs = 120;
                s.last_synced_at = Some(1_700_000_123);
            });

            let original = registry.persisted_state();
            store.save(&original).unwrap();
            let loaded = store.load();

            assert_eq!(loaded.nodes, original.nodes, "count={count}");
            assert_eq!(loaded.settings, original.settings);
            assert_eq!(loaded.active, original.active);
            assert_eq!(loaded.next_index, original.next_index);
        }
    }

    #[test]
    fn round_trip_without_selection() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let original = populated_registry(3).persisted_state();

        store.save(&original).unwrap();
        let loaded = store.load();
        assert!(loaded.active.is_none());
        assert_eq!(loaded.nodes.len(), 3);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::fs::write(store.path(), b"{ not json").unwrap();

        let state = store.load();
        assert!(state.nodes.is_empty());
        assert_eq!(state.next_index, 1);
    }

    #[test]
    fn stale_temp_file_does_not_break_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let committed = populated_registry(2).persisted_state();
        store.save(&committed).unwrap();

        // Simulate an interrupted later save: an orphaned temp file
        // next to the target.
        std::fs::write(dir.path().join(".tmpabc123"), b"partial garbage").unwrap();

        let loaded = store.load();
        assert_eq!(loaded.nodes, committed.nodes);
    }

    #[test]
    fn load_normalizes_decorated_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let doc = serde_json::json!({
            "active_node": "<AA:BB>",
            "nodes": {
                "<AA:BB>": {
                    "display_name": "PropNode-aabb",
                    "index": 7,
                    "last_seen": 100,
                    "hash": "<AA:BB>",
                    "identity_hash": "id-1",
                    "operator_name": null,
                    "enabled": null,
                    "per_transfer_limit": null
                }
            }
        });
        std::fs::write(store.path(), serde_json::to_vec(&doc).unwrap()).unwrap();

        let state = store.load();
        let hash = hash("aabb");
        assert_eq!(state.active, Some(hash.clone()));
        assert_eq!(state.nodes[&hash].hash, hash);
        assert_eq!(state.next_index, 8);
    }

    #[test]
    fn invalid_node_keys_are_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let doc = serde_json::json!({
            "nodes": {
                "not hex!": {
                    "display_name": "x", "index": 1, "last_seen": 0, "hash": "not hex!",
                    "identity_hash": "", "operator_name": null, "enabled": null,
                    "per_transfer_limit": null
                },
                "cafe": {
                    "display_name": "PropNode-cafe", "index": 2, "last_seen": 0, "hash": "cafe",
                    "identity_hash": "", "operator_name": null, "enabled": null,
                    "per_transfer_limit": null
                }
            }
        });
        std::fs::write(store.path(), serde_json::to_vec(&doc).unwrap()).unwrap();

        let state = store.load();
        assert_eq!(state.nodes.len(), 1);
        assert!(state.nodes.contains_key(&hash("cafe")));
        assert_eq!(state.next_index, 3);
    }

    #[test]
    fn save_into_missing_directory_reports_not_panics() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::new(dir.path().join("gone").join("state.json"));
        let result = store.save(&PersistedState::default());
        assert!(result.is_err());

        // Best-effort variant swallows the same error.
        store.save_best_effort(&PersistedState::default());
    }
}
