//! Silent retry of failed direct deliveries
//!
//! Hooks the host's delivery-failure path: when a direct or
//! opportunistic message permanently fails and an active relay is
//! selected, the message is resubmitted with propagated delivery. A
//! message that was already being propagated is never retried, which is
//! what keeps one failure from looping forever.

use crate::plugin::{EventSender, PluginEvent};
use crate::registry::NodeRegistry;
use crate::transport::{
    resolve_identity, DeliveryMethod, FailedDelivery, MeshTransport, OutboundMessage, PeerDirectory,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded wait for destination-identity resolution during a retry
pub const RETRY_PATH_WAIT: Duration = Duration::from_secs(2);

pub struct RetryInterceptor {
    registry: Arc<NodeRegistry>,
    transport: Arc<dyn MeshTransport>,
    directory: Arc<dyn PeerDirectory>,
    events: EventSender,
}

impl RetryInterceptor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        transport: Arc<dyn MeshTransport>,
        directory: Arc<dyn PeerDirectory>,
        events: EventSender,
    ) -> Self {
        Self {
            registry,
            transport,
            directory,
            events,
        }
    }

    /// Handle one permanent delivery failure. Called once per failure
    /// event; submits at most one retry and never propagates an error
    /// back into the host's callback path.
    pub async fn handle_failure(&self, failed: FailedDelivery) {
        let settings = self.registry.settings();
        if !settings.enabled || !settings.auto_retry_failed {
            return;
        }

        let Some(node) = self.registry.active_node() else {
            return;
        };

        if failed.desired_method == DeliveryMethod::Propagated {
            debug!(
                destination = %failed.destination,
                "not retrying an already-propagated message"
            );
            return;
        }

        let recipient = self.directory.contact_label(&failed.destination);

        if resolve_identity(&*self.transport, &failed.destination, RETRY_PATH_WAIT)
            .await
            .is_none()
        {
            info!(
                destination = %failed.destination,
                "cannot recall destination identity, retry abandoned"
            );
            self.events.emit(PluginEvent::RetryAbandoned {
                recipient,
                reason: "cannot recall destination identity".into(),
            });
            return;
        }

        let retry = OutboundMessage {
            destination: failed.destination.clone(),
            content: failed.content,
            title: failed.title,
            fields: failed.fields,
            method: DeliveryMethod::Propagated,
        };

        // Retry proceeds even against a relay flagged disabled; the
        // operator gets a note instead of a refusal.
        let node_disabled = node.enabled == Some(false);

        self.transport.set_outbound_relay(Some(node.hash.clone()));
        if let Err(e) = self.transport.submit_message(retry).await {
            warn!(destination = %failed.destination, "retry submission failed: {e}");
            self.events.emit(PluginEvent::RetryAbandoned {
                recipient,
                reason: e.to_string(),
            });
            return;
        }

        info!(
            recipient = %recipient,
            relay = %node.hash,
            operator = node.operator_label(),
            node_disabled,
            "failed message queued via propagation node"
        );
        self.events.emit(PluginEvent::RetryQueued {
            recipient,
            operator: node.operator_label().to_string(),
            node_disabled,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeCapability;
    use crate::transport::{NodeHash, SimTransport, StaticDirectory};

    fn hash(s: &str) -> NodeHash {
        NodeHash::parse(s).unwrap()
    }

    struct Fixture {
        interceptor: RetryInterceptor,
        registry: Arc<NodeRegistry>,
        transport: Arc<SimTransport>,
        events: tokio::sync::mpsc::UnboundedReceiver<PluginEvent>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(NodeRegistry::new());
        let transport = SimTransport::new();
        let directory = StaticDirectory::new();
        let (events, rx) = EventSender::channel();
        let interceptor = RetryInterceptor::new(
            registry.clone(),
            transport.clone(),
            directory,
            events,
        );
        Fixture {
            interceptor,
            registry,
            transport,
            events: rx,
        }
    }

    fn failed(dest: &str, method: DeliveryMethod) -> FailedDelivery {
        FailedDelivery {
            destination: hash(dest),
            content: "hello".into(),
            title: "greeting".into(),
            fields: Default::default(),
            desired_method: method,
        }
    }

    fn arm(fixture: &Fixture, relay_enabled: Option<bool>) {
        fixture.registry.update_settings(|s| s.enabled = true);
        fixture.registry.upsert(
            &hash("aa01"),
            "relay-id",
            Some("Bob".into()),
            relay_enabled.map(|enabled| NodeCapability {
                timebase: 1,
                enabled,
                per_transfer_limit: 1000,
            }),
        );
        fixture.registry.set_active(hash("aa01"));
    }

    #[tokio::test]
    async fn retries_direct_failure_as_propagated() {
        let mut f = fixture();
        arm(&f, Some(true));
        f.transport.learn_identity(hash("dd99"), "dest-id");

        f.interceptor
            .handle_failure(failed("dd99", DeliveryMethod::Direct))
            .await;

        let submitted = f.transport.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].method, DeliveryMethod::Propagated);
        assert_eq!(submitted[0].destination, hash("dd99"));
        assert_eq!(submitted[0].content, "hello");
        assert_eq!(f.transport.outbound_relay(), Some(hash("aa01")));

        assert!(matches!(
            f.events.try_recv().unwrap(),
            PluginEvent::RetryQueued { node_disabled: false, .. }
        ));
    }

    #[tokio::test]
    async fn already_propagated_message_is_never_retried() {
        let mut f = fixture();
        arm(&f, Some(true));
        f.transport.learn_identity(hash("dd99"), "dest-id");

        f.interceptor
            .handle_failure(failed("dd99", DeliveryMethod::Propagated))
            .await;

        assert!(f.transport.submitted().is_empty());
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn opportunistic_failures_are_retried() {
        let f = fixture();
        arm(&f, Some(true));
        f.transport.learn_identity(hash("dd99"), "dest-id");

        f.interceptor
            .handle_failure(failed("dd99", DeliveryMethod::Opportunistic))
            .await;

        assert_eq!(f.transport.submitted().len(), 1);
    }

    #[tokio::test]
    async fn no_retry_when_plugin_or_toggle_off_or_no_relay() {
        let f = fixture();
        f.transport.learn_identity(hash("dd99"), "dest-id");

        // Plugin disabled.
        f.interceptor
            .handle_failure(failed("dd99", DeliveryMethod::Direct))
            .await;
        assert!(f.transport.submitted().is_empty());

        // Enabled but auto-retry off.
        f.registry.update_settings(|s| {
            s.enabled = true;
            s.auto_retry_failed = false;
        });
        f.interceptor
            .handle_failure(failed("dd99", DeliveryMethod::Direct))
            .await;
        assert!(f.transport.submitted().is_empty());

        // Toggles on but no active relay.
        f.registry.update_settings(|s| s.auto_retry_failed = true);
        f.interceptor
            .handle_failure(failed("dd99", DeliveryMethod::Direct))
            .await;
        assert!(f.transport.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_identity_abandons_silently() {
        let mut f = fixture();
        arm(&f, Some(true));
        // Identity never becomes recallable.

        f.interceptor
            .handle_failure(failed("dd99", DeliveryMethod::Direct))
            .await;

        assert!(f.transport.submitted().is_empty());
        assert!(matches!(
            f.events.try_recv().unwrap(),
            PluginEvent::RetryAbandoned { .. }
        ));
    }

    #[tokio::test]
    async fn identity_resolved_after_path_request() {
        let f = fixture();
        arm(&f, Some(true));
        f.transport.stage_identity(hash("dd99"), "dest-id");

        f.interceptor
            .handle_failure(failed("dd99", DeliveryMethod::Direct))
            .await;

        assert_eq!(f.transport.submitted().len(), 1);
        assert_eq!(f.transport.path_requests(), vec![hash("dd99")]);
    }

    #[tokio::test]
    async fn disabled_relay_still_used_with_note() {
        let mut f = fixture();
        arm(&f, Some(false));
        f.transport.learn_identity(hash("dd99"), "dest-id");

        f.interceptor
            .handle_failure(failed("dd99", DeliveryMethod::Direct))
            .await;

        assert_eq!(f.transport.submitted().len(), 1);
        assert!(matches!(
            f.events.try_recv().unwrap(),
            PluginEvent::RetryQueued { node_disabled: true, .. }
        ));
    }
}
