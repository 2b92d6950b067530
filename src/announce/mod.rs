//! Discovery-event handling
//!
//! Consumes announces from the relay-service aspect, decodes the
//! advertised capability record and keeps the registry current. Runs on
//! the transport's event-delivery pump, so nothing in here may panic or
//! return an error to the caller.

use crate::plugin::{EventSender, PluginEvent};
use crate::registry::{NodeCapability, NodeRegistry, PersistenceStore};
use crate::transport::{Announce, PeerDirectory};
use std::sync::Arc;
use tracing::{debug, info};

/// Aspect filter for propagation-node announces
pub const PROPAGATION_ASPECT: &str = "lxmf.propagation";

/// Decode the capability record carried in an announce payload:
/// timebase, enabled flag and per-transfer limit. Trailing bytes are
/// tolerated. Returns `None` on any decode failure; the announce is
/// still useful without it.
pub fn decode_capability(payload: &[u8]) -> Option<NodeCapability> {
    let (timebase, enabled, per_transfer_limit): (u64, bool, u64) =
        bincode::deserialize(payload).ok()?;
    Some(NodeCapability {
        timebase,
        enabled,
        per_transfer_limit,
    })
}

pub struct AnnounceListener {
    registry: Arc<NodeRegistry>,
    store: Arc<PersistenceStore>,
    directory: Arc<dyn PeerDirectory>,
    events: EventSender,
}

impl AnnounceListener {
    pub fn new(
        registry: Arc<NodeRegistry>,
        store: Arc<PersistenceStore>,
        directory: Arc<dyn PeerDirectory>,
        events: EventSender,
    ) -> Self {
        Self {
            registry,
            store,
            directory,
            events,
        }
    }

    /// Process one announce: decode capability (best-effort), resolve
    /// the operator label, upsert and persist. Emits a discovery
    /// notification for new nodes when alerts are on.
    pub fn handle_announce(&self, announce: &Announce) {
        let capability = announce.app_data.as_deref().and_then(|payload| {
            let decoded = decode_capability(payload);
            if decoded.is_none() {
                debug!(
                    node = %announce.destination_hash,
                    "undecodable capability payload, keeping node with capability unknown"
                );
            }
            decoded
        });

        let operator = self.directory.display_name(&announce.identity_hash);

        let outcome = self.registry.upsert(
            &announce.destination_hash,
            &announce.identity_hash,
            operator,
            capability,
        );

        if outcome.is_new {
            info!(
                node = %outcome.node.hash,
                index = outcome.node.index,
                status = outcome.node.capability_label(),
                "discovered propagation node"
            );
            if self.registry.settings().show_discovery {
                self.events.emit(PluginEvent::NodeDiscovered {
                    index: outcome.node.index,
                    hash: outcome.node.hash.clone(),
                    enabled: outcome.node.enabled,
                    operator: outcome.node.operator_name.clone(),
                });
            }
        }

        self.store.save_best_effort(&self.registry.persisted_state());
    }
}
