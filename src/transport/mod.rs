//! Host/transport contract
//!
//! Everything this subsystem needs from its environment, stated as an
//! explicit interface instead of runtime attribute probing: announce
//! subscription, identity recall, path requests, outbound relay
//! association, message submission and transfer-state polling. A host
//! that cannot provide one of these fails to compile against the trait
//! rather than failing at runtime.

pub mod sim;
pub mod types;

pub use sim::{SimTransport, StaticDirectory};
pub use types::{
    Announce, DeliveryMethod, FailedDelivery, HashParseError, MessageFields, NodeHash,
    OutboundMessage, TransportError, TransportResult,
};

use crate::sync::SyncSnapshot;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How often bounded identity-resolution waits re-check recall.
const RECALL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The mesh transport as seen by this subsystem.
///
/// Calls are synchronous from the caller's point of view and bounded by
/// fixed timeouts; there is no cancellation into an in-flight network
/// primitive. That is the soft-cancellation ceiling of the system.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Subscribe to discovery announces matching an aspect filter.
    /// Events are delivered on the returned channel in receipt order.
    fn subscribe_announces(&self, aspect_filter: &str) -> mpsc::UnboundedReceiver<Announce>;

    /// Subscribe to permanently-failed outbound deliveries.
    fn subscribe_delivery_failures(&self) -> mpsc::UnboundedReceiver<FailedDelivery>;

    /// Resolve a destination hash to its identity hash, if known.
    fn recall_identity(&self, hash: &NodeHash) -> Option<String>;

    /// Ask the network to discover a route to the given destination.
    fn request_path(&self, hash: &NodeHash);

    /// Set or clear the relay used for propagated outbound messages.
    fn set_outbound_relay(&self, relay: Option<NodeHash>);

    /// Hand one outbound message to the transport's delivery queue.
    async fn submit_message(&self, message: OutboundMessage) -> TransportResult<()>;

    /// Ask the active relay for messages queued for our own identity.
    async fn request_queued_messages(&self) -> TransportResult<()>;

    /// Current state of the ongoing (or last) pickup transaction.
    fn transfer_status(&self) -> SyncSnapshot;
}

/// Read-only view of the host's known peers, used to attach operator
/// labels to nodes and to resolve `send` targets.
pub trait PeerDirectory: Send + Sync {
    /// Display name for a known identity, if the host has one.
    fn display_name(&self, identity_hash: &str) -> Option<String>;

    /// Resolve operator input (contact name, index or raw hash) to a
    /// destination hash.
    fn resolve_destination(&self, input: &str) -> Option<NodeHash> {
        NodeHash::parse(input).ok()
    }

    /// Short human label for a destination, falling back to the hash.
    fn contact_label(&self, hash: &NodeHash) -> String {
        format!("{}...", hash.short())
    }
}

/// Recall an identity, issuing a path request and re-checking for up to
/// `wait` when it is not immediately known. Returns `None` when the
/// identity is still unknown at the deadline.
pub async fn resolve_identity(
    transport: &dyn MeshTransport,
    hash: &NodeHash,
    wait: Duration,
) -> Option<String> {
    if let Some(identity) = transport.recall_identity(hash) {
        return Some(identity);
    }

    transport.request_path(hash);
    let deadline = Instant::now() + wait;

    loop {
        tokio::time::sleep(RECALL_POLL_INTERVAL).await;
        if let Some(identity) = transport.recall_identity(hash) {
            return Some(identity);
        }
        if Instant::now() >= deadline {
            return None;
        }
    }
}
