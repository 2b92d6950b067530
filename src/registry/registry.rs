//! Concurrency-safe table of known propagation nodes

use crate::registry::store::PersistedState;
use crate::registry::types::{NodeCapability, NodeCounts, PropagationNode, Settings, UpsertOutcome};
use crate::transport::NodeHash;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The single source of truth for nodes, settings and the active
/// selection.
///
/// One mutex guards all of it. Every public method takes the lock,
/// copies what it needs and releases it before returning, so callers
/// never iterate live state and the lock is never held across network
/// calls or file I/O. Announce processing, operator commands, the
/// scheduler and the retry hook all go through here.
pub struct NodeRegistry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    nodes: HashMap<NodeHash, PropagationNode>,
    next_index: u32,
    active: Option<NodeHash>,
    settings: Settings,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                nodes: HashMap::new(),
                next_index: 1,
                active: None,
                settings: Settings::default(),
            }),
        }
    }

    /// Rebuild from a loaded state. A persisted selection that no
    /// longer resolves to an entry gets a placeholder, keeping the
    /// invariant that the selection always points at some node.
    pub fn from_persisted(state: PersistedState) -> Self {
        let mut inner = RegistryInner {
            nodes: state.nodes,
            next_index: state.next_index,
            active: state.active,
            settings: state.settings,
        };

        if let Some(active) = inner.active.clone() {
            if !inner.nodes.contains_key(&active) {
                let index = inner.next_index;
                inner.next_index += 1;
                inner
                    .nodes
                    .insert(active.clone(), PropagationNode::placeholder(active, index));
            }
        }

        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Create or refresh a node from an announce.
    ///
    /// New hashes get a fresh index and `last_seen = now`. Existing
    /// entries keep their index forever; `last_seen` never moves
    /// backward, and known information is never downgraded: an operator
    /// name is only written when one was resolved and none is stored,
    /// capability fields only when a payload decoded.
    pub fn upsert(
        &self,
        hash: &NodeHash,
        identity_hash: &str,
        operator_name: Option<String>,
        capability: Option<NodeCapability>,
    ) -> UpsertOutcome {
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock();

        if let Some(node) = inner.nodes.get_mut(hash) {
            node.last_seen = node.last_seen.max(now);
            node.identity_hash = identity_hash.to_string();
            if node.operator_name.is_none() {
                if let Some(name) = operator_name {
                    node.operator_name = Some(name);
                }
            }
            if let Some(cap) = capability {
                node.enabled = Some(cap.enabled);
                node.per_transfer_limit = Some(cap.per_transfer_limit);
            }
            return UpsertOutcome {
                node: node.clone(),
                is_new: false,
            };
        }

        let index = inner.next_index;
        inner.next_index += 1;

        let node = PropagationNode {
            display_name: format!("PropNode-{}", hash.tag()),
            index,
            last_seen: now,
            hash: hash.clone(),
            identity_hash: identity_hash.to_string(),
            operator_name,
            enabled: capability.map(|c| c.enabled),
            per_transfer_limit: capability.map(|c| c.per_transfer_limit),
        };
        inner.nodes.insert(hash.clone(), node.clone());

        UpsertOutcome { node, is_new: true }
    }

    /// Insert a never-seen entry for an operator-selected hash, or
    /// return the existing entry if one appeared in the meantime.
    pub fn insert_placeholder(&self, hash: &NodeHash) -> PropagationNode {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.nodes.get(hash) {
            return existing.clone();
        }

        let index = inner.next_index;
        inner.next_index += 1;
        let node = PropagationNode::placeholder(hash.clone(), index);
        inner.nodes.insert(hash.clone(), node.clone());
        node
    }

    /// Deep copy of all nodes; iterate this, never live state.
    pub fn snapshot(&self) -> HashMap<NodeHash, PropagationNode> {
        self.inner.lock().nodes.clone()
    }

    pub fn get(&self, hash: &NodeHash) -> Option<PropagationNode> {
        self.inner.lock().nodes.get(hash).cloned()
    }

    pub fn find_by_index(&self, index: u32) -> Option<PropagationNode> {
        self.inner
            .lock()
            .nodes
            .values()
            .find(|n| n.index == index)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().nodes.is_empty()
    }

    pub fn counts(&self) -> NodeCounts {
        let inner = self.inner.lock();
        let mut counts = NodeCounts {
            total: inner.nodes.len(),
            ..NodeCounts::default()
        };
        for node in inner.nodes.values() {
            match node.enabled {
                Some(true) => counts.enabled += 1,
                Some(false) => counts.disabled += 1,
                None => counts.unknown += 1,
            }
        }
        counts
    }

    pub fn active_hash(&self) -> Option<NodeHash> {
        self.inner.lock().active.clone()
    }

    /// Snapshot copy of the active node, if a selection is set.
    pub fn active_node(&self) -> Option<PropagationNode> {
        let inner = self.inner.lock();
        inner
            .active
            .as_ref()
            .and_then(|hash| inner.nodes.get(hash))
            .cloned()
    }

    pub fn set_active(&self, hash: NodeHash) {
        self.inner.lock().active = Some(hash);
    }

    pub fn clear_active(&self) -> Option<NodeHash> {
        self.inner.lock().active.take()
    }

    pub fn settings(&self) -> Settings {
        self.inner.lock().settings.clone()
    }

    pub fn update_settings(&self, mutate: impl FnOnce(&mut Settings)) -> Settings {
        let mut inner = self.inner.lock();
        mutate(&mut inner.settings);
        inner.settings.clone()
    }

    /// Copy of everything the persistence store writes to disk.
    pub fn persisted_state(&self) -> PersistedState {
        let inner = self.inner.lock();
        PersistedState {
            nodes: inner.nodes.clone(),
            next_index: inner.next_index,
            active: inner.active.clone(),
            settings: inner.settings.clone(),
        }
    }
}
