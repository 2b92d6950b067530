//! One pickup transaction against the active propagation node

use crate::plugin::{EventSender, PluginEvent};
use crate::registry::{NodeRegistry, PersistenceStore};
use crate::sync::types::{SyncSnapshot, SyncState};
use crate::transport::{resolve_identity, MeshTransport};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bounded wait for the relay's own identity before giving up
pub const SYNC_PATH_WAIT: Duration = Duration::from_secs(3);

/// How often the watcher polls the transfer state
pub const WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// How long the watcher keeps polling before giving up
pub const WATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one `trigger_sync` call
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Pickup request dispatched; a watcher is reporting the outcome
    Started,

    /// No active propagation node is selected
    NoActiveNode,

    /// The relay's identity could not be recalled within the deadline
    NoPath,

    /// The transport rejected the pickup request
    RequestFailed(String),
}

/// Issues pickup requests and watches them to completion.
///
/// Manual (`sync` command) and scheduled syncs share `trigger_sync`;
/// each call runs one session. The watcher is an independent task so a
/// slow relay never blocks commands or announce processing.
pub struct SyncEngine {
    registry: Arc<NodeRegistry>,
    store: Arc<PersistenceStore>,
    transport: Arc<dyn MeshTransport>,
    events: EventSender,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<NodeRegistry>,
        store: Arc<PersistenceStore>,
        transport: Arc<dyn MeshTransport>,
        events: EventSender,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            events,
            watcher: Mutex::new(None),
        }
    }

    /// Request the messages queued for our identity from the active
    /// relay and start a watcher for the transaction.
    pub async fn trigger_sync(&self) -> SyncOutcome {
        let Some(node) = self.registry.active_node() else {
            return SyncOutcome::NoActiveNode;
        };

        info!(
            relay = %node.hash,
            operator = node.operator_label(),
            "starting sync from propagation node"
        );
        self.events.emit(PluginEvent::SyncStarted {
            operator: node.operator_label().to_string(),
        });

        self.transport.set_outbound_relay(Some(node.hash.clone()));

        if resolve_identity(&*self.transport, &node.hash, SYNC_PATH_WAIT)
            .await
            .is_none()
        {
            warn!(relay = %node.hash, "cannot recall propagation node identity");
            self.events.emit(PluginEvent::SyncFailed {
                reason: SyncState::NoPath
                    .failure_reason()
                    .unwrap_or("No path")
                    .to_string(),
            });
            return SyncOutcome::NoPath;
        }

        if let Err(e) = self.transport.request_queued_messages().await {
            warn!(relay = %node.hash, "pickup request failed: {e}");
            self.events.emit(PluginEvent::SyncFailed {
                reason: e.to_string(),
            });
            return SyncOutcome::RequestFailed(e.to_string());
        }

        self.registry
            .update_settings(|s| s.last_synced_at = Some(Utc::now().timestamp()));
        self.store.save_best_effort(&self.registry.persisted_state());

        self.spawn_watcher();
        SyncOutcome::Started
    }

    /// Current transfer state, read without side effects.
    pub fn status(&self) -> SyncSnapshot {
        self.transport.transfer_status()
    }

    fn spawn_watcher(&self) {
        let transport = self.transport.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(watch_transfer(transport, events));

        let mut slot = self.watcher.lock();
        if let Some(previous) = slot.replace(handle) {
            if !previous.is_finished() {
                previous.abort();
            }
        }
    }

    /// Stop an in-flight watcher, if any. Used at plugin teardown.
    pub fn abort_watcher(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}

/// Poll the transfer state until it reaches a terminal state and
/// report the outcome. A session that never terminates within the
/// timeout is dropped with only a debug log; the operator is not
/// notified, which is a known gap worth revisiting.
async fn watch_transfer(transport: Arc<dyn MeshTransport>, events: EventSender) {
    let deadline = Instant::now() + WATCH_TIMEOUT;

    loop {
        let status = transport.transfer_status();

        if status.state == SyncState::Complete {
            let received = status.last_result.unwrap_or(0);
            let duplicates = status.last_duplicates.unwrap_or(0);
            info!(received, duplicates, "sync complete");
            events.emit(PluginEvent::SyncCompleted {
                received,
                duplicates,
            });
            return;
        }

        if status.state.is_failure() {
            let reason = status
                .state
                .failure_reason()
                .unwrap_or("Unknown error")
                .to_string();
            info!(state = status.state.label(), "sync failed: {reason}");
            events.emit(PluginEvent::SyncFailed { reason });
            return;
        }

        if Instant::now() >= deadline {
            debug!(
                state = status.state.label(),
                "sync watcher gave up after {WATCH_TIMEOUT:?} without a terminal state"
            );
            return;
        }

        tokio::time::sleep(WATCH_INTERVAL).await;
    }
}
