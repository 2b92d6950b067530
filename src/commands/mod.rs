//! Operator command surface
//!
//! Parses and executes the plugin's commands, returning the text to
//! show the operator. Malformed input yields a usage message and
//! mutates nothing.

use crate::registry::{NodeRegistry, PersistenceStore, MIN_SYNC_INTERVAL_SECS};
use crate::selector::ActiveNodeSelector;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::transport::{
    resolve_identity, DeliveryMethod, MeshTransport, OutboundMessage, PeerDirectory,
};
use chrono::Utc;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Bounded wait for destination-identity resolution during `send`
pub const SEND_PATH_WAIT: Duration = Duration::from_secs(2);

const HELP: &str = "\
Propagation node commands:
  status               - Show detailed status
  on|off               - Enable/disable plugin
  list                 - List propagation nodes
  set <#|hash>         - Set active node by index or hash
  unset                - Deactivate node
  sync [status]        - Sync messages now / show sync state
  send <#|hash> <msg>  - Send via propagation node
  autosync on|off      - Toggle auto-sync
  interval <seconds>   - Set sync interval (min 30)
  retry on|off         - Toggle auto-retry of failed messages
  discover on|off      - Toggle discovery alerts";

pub struct CommandHandler {
    registry: Arc<NodeRegistry>,
    store: Arc<PersistenceStore>,
    transport: Arc<dyn MeshTransport>,
    directory: Arc<dyn PeerDirectory>,
    selector: ActiveNodeSelector,
    engine: Arc<SyncEngine>,
}

impl CommandHandler {
    pub fn new(
        registry: Arc<NodeRegistry>,
        store: Arc<PersistenceStore>,
        transport: Arc<dyn MeshTransport>,
        directory: Arc<dyn PeerDirectory>,
        engine: Arc<SyncEngine>,
    ) -> Self {
        let selector =
            ActiveNodeSelector::new(registry.clone(), store.clone(), transport.clone());
        Self {
            registry,
            store,
            transport,
            directory,
            selector,
            engine,
        }
    }

    /// Execute one command line and return the operator-facing output.
    pub async fn handle(&self, line: &str) -> String {
        let trimmed = line.trim();
        let (cmd, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim_start()),
            None => (trimmed, ""),
        };

        match cmd.to_ascii_lowercase().as_str() {
            "" | "help" => HELP.to_string(),
            "status" => self.status(),
            "on" | "enable" => self.set_plugin_enabled(true),
            "off" | "disable" => self.set_plugin_enabled(false),
            "list" => self.list(),
            "set" => match rest.split_whitespace().next() {
                Some(identifier) => self.set_active(identifier),
                None => "Usage: set <#|hash>".to_string(),
            },
            "unset" => self.unset_active(),
            "sync" => match rest.split_whitespace().next() {
                None => self.sync().await,
                Some(arg) if arg.eq_ignore_ascii_case("status") => self.sync_status(),
                Some(_) => "Usage: sync [status]".to_string(),
            },
            "send" => match rest.split_once(char::is_whitespace) {
                Some((target, message)) if !message.trim().is_empty() => {
                    self.send(target, message.trim()).await
                }
                _ => "Usage: send <#|hash> <message>".to_string(),
            },
            "autosync" => self.toggle(rest, "autosync", |s, on| s.auto_sync_enabled = on),
            "interval" => self.set_interval(rest),
            "retry" => self.toggle(rest, "retry", |s, on| s.auto_retry_failed = on),
            "discover" => self.toggle(rest, "discover", |s, on| s.show_discovery = on),
            other => format!("Unknown command: {other}\n{HELP}"),
        }
    }

    fn save(&self) {
        self.store.save_best_effort(&self.registry.persisted_state());
    }

    fn set_plugin_enabled(&self, enabled: bool) -> String {
        self.registry.update_settings(|s| s.enabled = enabled);
        self.save();
        info!(enabled, "plugin toggled");
        if enabled {
            "Plugin ENABLED".to_string()
        } else {
            "Plugin DISABLED".to_string()
        }
    }

    fn status(&self) -> String {
        let settings = self.registry.settings();
        let counts = self.registry.counts();
        let now = Utc::now().timestamp();

        let active = match self.registry.active_node() {
            Some(node) => format!("{} ({}...)", node.operator_label(), node.hash.tag()),
            None => "None".to_string(),
        };
        let last_sync = settings
            .last_synced_at
            .map(|ts| age_label(now, ts))
            .unwrap_or_else(|| "Never".to_string());

        let mut out = String::new();
        let _ = writeln!(out, "Propagation node plugin status");
        let _ = writeln!(out, "  Plugin:           {}", on_off(settings.enabled));
        let _ = writeln!(out, "  Active node:      {active}");
        let _ = writeln!(out, "  Last sync:        {last_sync}");
        let _ = writeln!(out, "  Auto-sync:        {}", on_off(settings.auto_sync_enabled));
        let _ = writeln!(out, "    Interval:       {}s", settings.auto_sync_interval_secs);
        let _ = writeln!(out, "  Auto-retry:       {}", on_off(settings.auto_retry_failed));
        let _ = writeln!(out, "  Discovery alerts: {}", on_off(settings.show_discovery));
        let _ = writeln!(
            out,
            "  Nodes:            {} total ({} enabled, {} disabled, {} unknown)",
            counts.total, counts.enabled, counts.disabled, counts.unknown
        );
        out.trim_end().to_string()
    }

    fn list(&self) -> String {
        let nodes = self.registry.snapshot();
        if nodes.is_empty() {
            let mut msg =
                "No propagation nodes discovered yet; discovery runs in the background".to_string();
            if !self.registry.settings().show_discovery {
                msg.push_str("\nAlerts are OFF - 'discover on' to see discoveries");
            }
            return msg;
        }

        let active = self.registry.active_hash();
        let now = Utc::now().timestamp();

        let mut sorted: Vec<_> = nodes.into_values().collect();
        sorted.sort_by_key(|node| node.index);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<5} {:<2} {:<10} {:<24} {:<18} {}",
            "#", "*", "Status", "Operator", "Hash", "Last seen"
        );
        for node in sorted {
            let marker = if active.as_ref() == Some(&node.hash) {
                "*"
            } else {
                ""
            };
            let seen = if node.last_seen == 0 {
                "never".to_string()
            } else {
                age_label(now, node.last_seen)
            };
            let mut operator = node.operator_label().to_string();
            if operator.len() > 22 {
                operator.truncate(19);
                operator.push_str("...");
            }
            let _ = writeln!(
                out,
                "{:<5} {:<2} {:<10} {:<24} {:<18} {}",
                node.index,
                marker,
                node.capability_label(),
                operator,
                node.hash.short(),
                seen
            );
        }
        out.trim_end().to_string()
    }

    fn set_active(&self, identifier: &str) -> String {
        match self.selector.set_active(identifier) {
            Ok(selection) => {
                let node = &selection.node;
                let mut out = format!(
                    "Active propagation node set: {} ({}...)",
                    node.operator_label(),
                    node.hash.short()
                );
                if selection.created_placeholder {
                    out.push_str("\nNode not announced yet; path requested, waiting for announce");
                }
                if selection.disabled_warning() {
                    out.push_str("\nNote: node is marked DISABLED, delivery may fail");
                }
                out
            }
            Err(e) => format!("{e}\nUsage: set <#|hash>"),
        }
    }

    fn unset_active(&self) -> String {
        match self.selector.unset_active() {
            Some(node) => format!("Deactivated: {}...", node.hash.short()),
            None => "No active propagation node".to_string(),
        }
    }

    async fn sync(&self) -> String {
        match self.engine.trigger_sync().await {
            SyncOutcome::Started => "Sync request sent, waiting for response...".to_string(),
            SyncOutcome::NoActiveNode => {
                "No propagation node configured; use 'set <#|hash>' first".to_string()
            }
            SyncOutcome::NoPath => {
                "Cannot recall propagation node identity; try again later".to_string()
            }
            SyncOutcome::RequestFailed(reason) => format!("Sync request failed: {reason}"),
        }
    }

    fn sync_status(&self) -> String {
        let snapshot = self.engine.status();
        let mut out = String::new();
        let _ = writeln!(out, "Sync status");
        let _ = writeln!(out, "  State:    {}", snapshot.state.label());
        let _ = writeln!(out, "  Progress: {}%", (snapshot.progress * 100.0) as u32);
        if let Some(result) = snapshot.last_result {
            let _ = writeln!(out, "  Last sync: {result} messages received");
        }
        out.trim_end().to_string()
    }

    async fn send(&self, target: &str, message: &str) -> String {
        let Some(node) = self.registry.active_node() else {
            return "No propagation node set; use 'set <#|hash>' first".to_string();
        };

        let Some(destination) = self.directory.resolve_destination(target) else {
            return format!("Contact not found: {target}");
        };

        let mut out = String::new();
        if node.enabled == Some(false) {
            let _ = writeln!(
                out,
                "Note: propagation node is marked DISABLED, sending anyway"
            );
        }

        if resolve_identity(&*self.transport, &destination, SEND_PATH_WAIT)
            .await
            .is_none()
        {
            let _ = write!(out, "Cannot recall identity for {target}; try again later");
            return out;
        }

        self.transport.set_outbound_relay(Some(node.hash.clone()));
        let submission = self
            .transport
            .submit_message(OutboundMessage {
                destination: destination.clone(),
                content: message.to_string(),
                title: String::new(),
                fields: Default::default(),
                method: DeliveryMethod::Propagated,
            })
            .await;

        match submission {
            Ok(()) => {
                let recipient = self.directory.contact_label(&destination);
                let _ = write!(
                    out,
                    "Message queued for {recipient} via propagation node operated by {}",
                    node.operator_label()
                );
                out
            }
            Err(e) => {
                let _ = write!(out, "Send failed: {e}");
                out
            }
        }
    }

    fn set_interval(&self, rest: &str) -> String {
        let Some(arg) = rest.split_whitespace().next() else {
            return "Usage: interval <seconds>".to_string();
        };
        let Ok(seconds) = arg.parse::<u64>() else {
            return format!("Invalid number: {arg}");
        };
        if seconds < MIN_SYNC_INTERVAL_SECS {
            return format!("Minimum interval: {MIN_SYNC_INTERVAL_SECS} seconds");
        }

        self.registry
            .update_settings(|s| s.auto_sync_interval_secs = seconds);
        self.save();
        format!("Sync interval set: {seconds}s")
    }

    fn toggle(
        &self,
        rest: &str,
        name: &str,
        apply: impl FnOnce(&mut crate::registry::Settings, bool),
    ) -> String {
        let on = match rest.split_whitespace().next() {
            Some(arg) if matches!(arg.to_ascii_lowercase().as_str(), "on" | "enable") => true,
            Some(arg) if matches!(arg.to_ascii_lowercase().as_str(), "off" | "disable") => false,
            _ => return format!("Usage: {name} <on|off>"),
        };

        self.registry.update_settings(|s| apply(s, on));
        self.save();
        format!("{name} {}", if on { "ENABLED" } else { "DISABLED" })
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "ENABLED"
    } else {
        "DISABLED"
    }
}

/// Humanized age of a timestamp, matching what operators expect from
/// the node list: "just now", "5m ago", "3h ago", "2d ago".
pub fn age_label(now: i64, then: i64) -> String {
    let diff = (now - then).max(0);
    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{}m ago", diff / 60)
    } else if diff < 86400 {
        format!("{}h ago", diff / 3600)
    } else {
        format!("{}d ago", diff / 86400)
    }
}
