//! Plugin lifecycle and wiring
//!
//! `PropagationPlugin::attach` builds the whole subsystem against a
//! host transport: loads persisted state, reapplies the stored relay
//! selection, starts the announce and delivery-failure pumps and the
//! periodic sync scheduler. `detach` tears all of that down again.

mod events;

pub use events::{EventSender, PluginEvent};

use crate::announce::{AnnounceListener, PROPAGATION_ASPECT};
use crate::commands::CommandHandler;
use crate::registry::{NodeRegistry, PersistenceStore};
use crate::retry::RetryInterceptor;
use crate::sync::{SyncEngine, SyncScheduler};
use crate::transport::{MeshTransport, PeerDirectory};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// File name of the persisted registry inside the storage directory
pub const STATE_FILE_NAME: &str = "prop_nodes.json";

pub struct PropagationPlugin {
    registry: Arc<NodeRegistry>,
    store: Arc<PersistenceStore>,
    transport: Arc<dyn MeshTransport>,
    engine: Arc<SyncEngine>,
    commands: CommandHandler,
    scheduler: Mutex<Option<SyncScheduler>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl PropagationPlugin {
    /// Attach the plugin to a host. Returns the plugin handle together
    /// with the receiver for operator notifications; the host decides
    /// how those lines are surfaced.
    pub fn attach(
        transport: Arc<dyn MeshTransport>,
        directory: Arc<dyn PeerDirectory>,
        storage_dir: &Path,
    ) -> (Arc<Self>, UnboundedReceiver<PluginEvent>) {
        let store = Arc::new(PersistenceStore::new(storage_dir.join(STATE_FILE_NAME)));
        let state = store.load();
        let registry = Arc::new(NodeRegistry::from_persisted(state));

        // Reapply a persisted selection so propagated sends work from
        // the first command after restart.
        if let Some(hash) = registry.active_hash() {
            debug!(node = %hash, "restoring persisted relay selection");
            transport.set_outbound_relay(Some(hash));
        }

        let (events, events_rx) = EventSender::channel();

        let engine = Arc::new(SyncEngine::new(
            registry.clone(),
            store.clone(),
            transport.clone(),
            events.clone(),
        ));
        let commands = CommandHandler::new(
            registry.clone(),
            store.clone(),
            transport.clone(),
            directory.clone(),
            engine.clone(),
        );

        let plugin = Arc::new(Self {
            registry: registry.clone(),
            store: store.clone(),
            transport: transport.clone(),
            engine: engine.clone(),
            commands,
            scheduler: Mutex::new(None),
            pumps: Mutex::new(Vec::new()),
        });

        let listener =
            AnnounceListener::new(registry.clone(), store, directory.clone(), events.clone());
        let mut announces = transport.subscribe_announces(PROPAGATION_ASPECT);
        let announce_pump = tokio::spawn(async move {
            while let Some(announce) = announces.recv().await {
                listener.handle_announce(&announce);
            }
            debug!("announce pump stopped");
        });

        let interceptor =
            RetryInterceptor::new(registry.clone(), transport.clone(), directory, events);
        let mut failures = transport.subscribe_delivery_failures();
        let failure_pump = tokio::spawn(async move {
            while let Some(failed) = failures.recv().await {
                interceptor.handle_failure(failed).await;
            }
            debug!("delivery-failure pump stopped");
        });

        plugin.pumps.lock().extend([announce_pump, failure_pump]);
        *plugin.scheduler.lock() = Some(SyncScheduler::spawn(registry, engine));

        info!(nodes = plugin.registry.len(), "propagation plugin attached");
        (plugin, events_rx)
    }

    /// Execute one operator command line.
    pub async fn handle_command(&self, line: &str) -> String {
        self.commands.handle(line).await
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Stop background work and write the registry out one last time.
    pub async fn detach(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }

        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
        self.engine.abort_watcher();
        self.transport.set_outbound_relay(None);

        self.store.save_best_effort(&self.registry.persisted_state());
        info!("propagation plugin detached");
    }
}
