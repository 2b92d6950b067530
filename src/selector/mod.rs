//! Active-node selection
//!
//! Chooses or clears the propagation node used for outbound relaying
//! and keeps the transport's outbound-relay association in step with
//! the stored selection.

use crate::registry::{NodeRegistry, PersistenceStore, PropagationNode};
use crate::transport::{HashParseError, MeshTransport, NodeHash};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("identifier is neither a known index nor a valid hash: {0}")]
    InvalidIdentifier(#[from] HashParseError),
}

/// A completed selection
#[derive(Debug, Clone)]
pub struct Selection {
    pub node: PropagationNode,

    /// The hash was unknown and a never-seen entry was created for it
    pub created_placeholder: bool,
}

impl Selection {
    /// Selecting a node flagged disabled is allowed, but delivery may
    /// fail; callers surface this as a warning.
    pub fn disabled_warning(&self) -> bool {
        self.node.enabled == Some(false)
    }
}

pub struct ActiveNodeSelector {
    registry: Arc<NodeRegistry>,
    store: Arc<PersistenceStore>,
    transport: Arc<dyn MeshTransport>,
}

impl ActiveNodeSelector {
    pub fn new(
        registry: Arc<NodeRegistry>,
        store: Arc<PersistenceStore>,
        transport: Arc<dyn MeshTransport>,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
        }
    }

    /// Activate a node by discovery index or raw hash.
    ///
    /// An identifier that matches no stored index falls through to hash
    /// resolution, and an unknown hash becomes a placeholder entry with
    /// a path request issued for it: operators may configure a relay
    /// before its first announce arrives.
    pub fn set_active(&self, identifier: &str) -> Result<Selection, SelectError> {
        if let Ok(index) = identifier.parse::<u32>() {
            if let Some(node) = self.registry.find_by_index(index) {
                return Ok(self.activate(node, false));
            }
        }

        let hash = NodeHash::parse(identifier)?;
        match self.registry.get(&hash) {
            Some(node) => Ok(self.activate(node, false)),
            None => {
                let node = self.registry.insert_placeholder(&hash);
                self.transport.request_path(&hash);
                info!(node = %hash, "selected undiscovered node, path requested");
                Ok(self.activate(node, true))
            }
        }
    }

    fn activate(&self, node: PropagationNode, created_placeholder: bool) -> Selection {
        self.registry.set_active(node.hash.clone());
        self.store.save_best_effort(&self.registry.persisted_state());
        self.transport.set_outbound_relay(Some(node.hash.clone()));

        if node.enabled == Some(false) {
            warn!(node = %node.hash, "active node is flagged disabled, delivery may fail");
        }
        info!(node = %node.hash, index = node.index, "active propagation node set");

        Selection {
            node,
            created_placeholder,
        }
    }

    /// Clear the selection and the transport's relay association.
    /// Returns the previously active node, if any.
    pub fn unset_active(&self) -> Option<PropagationNode> {
        let previous = self.registry.active_node();
        if self.registry.clear_active().is_some() {
            self.store.save_best_effort(&self.registry.persisted_state());
            self.transport.set_outbound_relay(None);
            info!("active propagation node cleared");
        }
        previous
    }

    pub fn get_active(&self) -> Option<PropagationNode> {
        self.registry.active_node()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeCapability;
    use crate::transport::SimTransport;

    fn hash(s: &str) -> NodeHash {
        NodeHash::parse(s).unwrap()
    }

    fn fixture(dir: &std::path::Path) -> (ActiveNodeSelector, Arc<NodeRegistry>, Arc<SimTransport>) {
        let registry = Arc::new(NodeRegistry::new());
        let store = Arc::new(PersistenceStore::new(dir.join("prop_nodes.json")));
        let transport = SimTransport::new();
        let selector = ActiveNodeSelector::new(registry.clone(), store, transport.clone());
        (selector, registry, transport)
    }

    #[test]
    fn set_by_index_then_get_returns_that_node() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, registry, transport) = fixture(dir.path());
        registry.upsert(&hash("aa01"), "id-1", None, None);
        registry.upsert(&hash("bb02"), "id-2", None, None);

        let selection = selector.set_active("2").unwrap();
        assert_eq!(selection.node.index, 2);
        assert!(!selection.created_placeholder);
        assert_eq!(selector.get_active().unwrap().index, 2);
        assert_eq!(transport.outbound_relay(), Some(hash("bb02")));
    }

    #[test]
    fn set_by_known_hash() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, registry, _) = fixture(dir.path());
        registry.upsert(&hash("aa01"), "id-1", None, None);

        let selection = selector.set_active("<AA:01>").unwrap();
        assert_eq!(selection.node.hash, hash("aa01"));
        assert!(!selection.created_placeholder);
    }

    #[test]
    fn unknown_identifier_creates_placeholder_and_requests_path() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, registry, transport) = fixture(dir.path());

        // No node with index 1 exists; "1" is still valid hex, so it
        // becomes a premature hash selection.
        let selection = selector.set_active("1").unwrap();
        assert!(selection.created_placeholder);
        assert_eq!(selection.node.index, 1);
        assert_eq!(selection.node.capability_label(), "UNKNOWN");
        assert_eq!(transport.path_requests(), vec![hash("1")]);
        assert!(registry.get(&hash("1")).is_some());
    }

    #[test]
    fn garbage_identifier_is_rejected_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, registry, transport) = fixture(dir.path());

        assert!(selector.set_active("zz-not-hex").is_err());
        assert!(registry.is_empty());
        assert!(selector.get_active().is_none());
        assert_eq!(transport.outbound_relay(), None);
    }

    #[test]
    fn disabled_node_selectable_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, registry, _) = fixture(dir.path());
        registry.upsert(
            &hash("aa01"),
            "id-1",
            None,
            Some(NodeCapability {
                timebase: 1,
                enabled: false,
                per_transfer_limit: 100,
            }),
        );

        let selection = selector.set_active("1").unwrap();
        assert!(selection.disabled_warning());
        assert_eq!(selector.get_active().unwrap().hash, hash("aa01"));
    }

    #[test]
    fn unset_clears_selection_and_transport() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, registry, transport) = fixture(dir.path());
        registry.upsert(&hash("aa01"), "id-1", None, None);
        selector.set_active("1").unwrap();

        let previous = selector.unset_active().unwrap();
        assert_eq!(previous.hash, hash("aa01"));
        assert!(selector.get_active().is_none());
        assert_eq!(transport.outbound_relay(), None);

        assert!(selector.unset_active().is_none());
    }

    #[test]
    fn selection_survives_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let (selector, registry, _) = fixture(dir.path());
        registry.upsert(&hash("aa01"), "id-1", None, None);
        selector.set_active("1").unwrap();

        let reloaded = PersistenceStore::new(dir.path().join("prop_nodes.json")).load();
        assert_eq!(reloaded.active, Some(hash("aa01")));
    }
}
