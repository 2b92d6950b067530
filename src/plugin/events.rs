//! Operator-facing notifications
//!
//! Background work (discovery, retries, sync watchers) reports through
//! an event channel rather than printing; the host decides how to
//! surface the lines.

use crate::transport::NodeHash;
use tokio::sync::mpsc;

/// One-line notifications emitted by background activity
#[derive(Debug, Clone, PartialEq)]
pub enum PluginEvent {
    /// A previously unknown propagation node announced itself
    NodeDiscovered {
        index: u32,
        hash: NodeHash,
        enabled: Option<bool>,
        operator: Option<String>,
    },

    /// A failed direct delivery was resubmitted via the active relay
    RetryQueued {
        recipient: String,
        operator: String,
        node_disabled: bool,
    },

    /// A retry attempt was abandoned without a submission
    RetryAbandoned { recipient: String, reason: String },

    /// A pickup request was dispatched to the active relay
    SyncStarted { operator: String },

    /// The watcher saw the pickup transaction complete
    SyncCompleted { received: u32, duplicates: u32 },

    /// The pickup transaction ended in a failure state
    SyncFailed { reason: String },
}

impl PluginEvent {
    /// Render as the one-line operator notification.
    pub fn render(&self) -> String {
        match self {
            Self::NodeDiscovered {
                index,
                hash,
                enabled,
                operator,
            } => {
                let status = match enabled {
                    Some(true) => "ENABLED",
                    Some(false) => "DISABLED",
                    None => "UNKNOWN",
                };
                let operator = operator
                    .as_deref()
                    .map(|name| format!(", operated by {name}"))
                    .unwrap_or_default();
                format!(
                    "Discovered propagation node #{index} {}... [{status}]{operator} - 'set {index}' to activate",
                    hash.short()
                )
            }
            Self::RetryQueued {
                recipient,
                operator,
                node_disabled,
            } => {
                let note = if *node_disabled {
                    " (node marked DISABLED, attempting anyway)"
                } else {
                    ""
                };
                format!("Retrying to {recipient} via propagation node operated by {operator}{note}")
            }
            Self::RetryAbandoned { recipient, reason } => {
                format!("Retry to {recipient} abandoned: {reason}")
            }
            Self::SyncStarted { operator } => {
                format!("Syncing from propagation node operated by {operator}...")
            }
            Self::SyncCompleted {
                received,
                duplicates,
            } => {
                let mut line = match received {
                    0 => "No messages waiting on propagation node".to_string(),
                    1 => "Received 1 message from propagation node".to_string(),
                    n => format!("Received {n} messages from propagation node"),
                };
                match duplicates {
                    0 => {}
                    1 => line.push_str(" (1 duplicate skipped)"),
                    n => line.push_str(&format!(" ({n} duplicates skipped)")),
                }
                line
            }
            Self::SyncFailed { reason } => format!("Sync failed: {reason}"),
        }
    }
}

/// Cloneable sender half of the notification channel. Emitting never
/// fails: a dropped receiver just means nobody is listening.
#[derive(Clone)]
pub struct EventSender(mpsc::UnboundedSender<PluginEvent>);

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PluginEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    pub fn emit(&self, event: PluginEvent) {
        let _ = self.0.send(event);
    }
}
