//! Periodic sync scheduling

use crate::registry::NodeRegistry;
use crate::sync::engine::SyncEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Delay before the initial sync after the loop starts
pub const INITIAL_SYNC_DELAY: Duration = Duration::from_secs(5);

/// Background loop that fires a sync every configured interval while
/// the plugin is enabled, auto-sync is on and a relay is selected.
///
/// One scheduler runs per plugin instance for the plugin's lifetime.
/// Sleeps are taken in one-second steps against an explicit stop
/// signal, so shutdown (and toggling auto-sync off) takes effect within
/// about a second instead of waiting out a full interval.
pub struct SyncScheduler {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn spawn(registry: Arc<NodeRegistry>, engine: Arc<SyncEngine>) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(registry, engine, stop_rx));
        Self { stop, handle }
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
        debug!("sync scheduler stopped");
    }
}

async fn run_loop(
    registry: Arc<NodeRegistry>,
    engine: Arc<SyncEngine>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("sync scheduler started");

    // Initial sync shortly after startup, when the preconditions
    // already hold.
    if wait_secs(&mut stop, INITIAL_SYNC_DELAY.as_secs()).await {
        return;
    }
    if should_sync(&registry) {
        info!("initial sync");
        engine.trigger_sync().await;
    }

    loop {
        // Re-read each cycle so interval changes apply without restart.
        let interval = registry.settings().auto_sync_interval_secs;
        if wait_secs(&mut stop, interval).await {
            return;
        }
        if should_sync(&registry) {
            info!("scheduled sync");
            engine.trigger_sync().await;
        }
    }
}

/// Sleep `secs` seconds in one-second steps, returning `true` as soon
/// as the stop signal fires (or its sender is gone).
async fn wait_secs(stop: &mut watch::Receiver<bool>, secs: u64) -> bool {
    for _ in 0..secs {
        tokio::select! {
            _ = stop.changed() => return true,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
    false
}

fn should_sync(registry: &NodeRegistry) -> bool {
    let settings = registry.settings();
    settings.enabled && settings.auto_sync_enabled && registry.active_hash().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::EventSender;
    use crate::registry::PersistenceStore;
    use crate::sync::types::{SyncSnapshot, SyncState};
    use crate::transport::{NodeHash, SimTransport};

    fn hash(s: &str) -> NodeHash {
        NodeHash::parse(s).unwrap()
    }

    struct Fixture {
        registry: Arc<NodeRegistry>,
        engine: Arc<SyncEngine>,
        transport: Arc<SimTransport>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(NodeRegistry::new());
        let store = Arc::new(PersistenceStore::new(dir.path().join("prop_nodes.json")));
        let transport = SimTransport::new();
        let (events, _rx) = EventSender::channel();
        let engine = Arc::new(SyncEngine::new(
            registry.clone(),
            store,
            transport.clone(),
            events,
        ));
        Fixture {
            registry,
            engine,
            transport,
            _dir: dir,
        }
    }

    fn arm(f: &Fixture) {
        f.registry.upsert(&hash("aa01"), "relay-id", None, None);
        f.registry.set_active(hash("aa01"));
        f.registry.update_settings(|s| {
            s.enabled = true;
            s.auto_sync_enabled = true;
            s.auto_sync_interval_secs = 60;
        });
        f.transport.learn_identity(hash("aa01"), "relay-id");
        f.transport
            .script_transfer(vec![SyncSnapshot::completed(0, 0)]);
    }

    #[test]
    fn should_sync_requires_all_three_conditions() {
        let f = fixture();
        assert!(!should_sync(&f.registry));

        f.registry.update_settings(|s| s.enabled = true);
        assert!(!should_sync(&f.registry), "no active node yet");

        f.registry.upsert(&hash("aa01"), "id", None, None);
        f.registry.set_active(hash("aa01"));
        assert!(should_sync(&f.registry));

        f.registry.update_settings(|s| s.auto_sync_enabled = false);
        assert!(!should_sync(&f.registry));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_sync_fires_after_startup_delay() {
        let f = fixture();
        arm(&f);

        let scheduler = SyncScheduler::spawn(f.registry.clone(), f.engine.clone());
        tokio::time::sleep(Duration::from_secs(8)).await;

        assert!(f.transport.queued_requests() >= 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_sync_when_plugin_disabled() {
        let f = fixture();
        arm(&f);
        f.registry.update_settings(|s| s.enabled = false);

        let scheduler = SyncScheduler::spawn(f.registry.clone(), f.engine.clone());
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(f.transport.queued_requests(), 0);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn interval_elapses_then_fires_again() {
        let f = fixture();
        arm(&f);

        let scheduler = SyncScheduler::spawn(f.registry.clone(), f.engine.clone());
        tokio::time::sleep(Duration::from_secs(8)).await;
        let after_initial = f.transport.queued_requests();
        assert!(after_initial >= 1);

        tokio::time::sleep(Duration::from_secs(70)).await;
        assert!(f.transport.queued_requests() > after_initial);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_long_interval() {
        let f = fixture();
        arm(&f);
        f.registry
            .update_settings(|s| s.auto_sync_interval_secs = 3600);

        let scheduler = SyncScheduler::spawn(f.registry.clone(), f.engine.clone());
        tokio::time::sleep(Duration::from_secs(10)).await;

        // Must return promptly rather than waiting out the hour.
        tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
            .await
            .expect("scheduler stops within the step granularity");
    }

    #[tokio::test(start_paused = true)]
    async fn toggling_auto_sync_off_suppresses_firing() {
        let f = fixture();
        arm(&f);
        f.registry
            .update_settings(|s| s.auto_sync_interval_secs = 60);

        let scheduler = SyncScheduler::spawn(f.registry.clone(), f.engine.clone());
        tokio::time::sleep(Duration::from_secs(8)).await;
        let baseline = f.transport.queued_requests();

        f.registry.update_settings(|s| s.auto_sync_enabled = false);
        tokio::time::sleep(Duration::from_secs(300)).await;

        assert_eq!(f.transport.queued_requests(), baseline);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_state_machine_is_not_required_for_scheduling() {
        let f = fixture();
        arm(&f);
        f.transport
            .script_transfer(vec![SyncSnapshot::at(SyncState::NoAccess, 0.0)]);

        let scheduler = SyncScheduler::spawn(f.registry.clone(), f.engine.clone());
        tokio::time::sleep(Duration::from_secs(8)).await;

        // A failing transfer still counts as a dispatched request; the
        // next interval will simply try again.
        assert!(f.transport.queued_requests() >= 1);
        scheduler.shutdown().await;
    }
}
