//! In-process simulated transport
//!
//! Stands in for a real mesh stack in the demo binary and in tests:
//! announces, path discovery, message submission and sync transfers are
//! all driven from the outside through the helper methods, so every
//! coordinator path can be exercised without a network.

use crate::sync::{SyncSnapshot, SyncState};
use crate::transport::types::{
    Announce, FailedDelivery, NodeHash, OutboundMessage, TransportResult,
};
use crate::transport::{MeshTransport, PeerDirectory};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct SimInner {
    announce_subs: Vec<(String, mpsc::UnboundedSender<Announce>)>,
    failure_subs: Vec<mpsc::UnboundedSender<FailedDelivery>>,

    /// Identities recallable right now
    identities: HashMap<NodeHash, String>,

    /// Identities that become recallable once a path request arrives
    staged_identities: HashMap<NodeHash, String>,

    outbound_relay: Option<NodeHash>,
    path_requests: Vec<NodeHash>,
    submitted: Vec<OutboundMessage>,
    queued_requests: usize,

    status: SyncSnapshot,

    /// Statuses handed out on successive `transfer_status` polls;
    /// the last one sticks once the script runs dry.
    script: VecDeque<SyncSnapshot>,

    /// When set, `request_queued_messages` loads a canned
    /// successful-sync script with a random result count.
    auto_script: bool,
}

/// Simulated mesh transport for the demo binary and tests
#[derive(Default)]
pub struct SimTransport {
    inner: Mutex<SimInner>,
}

impl SimTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver an announce to every subscriber whose filter matches.
    pub fn publish_announce(&self, aspect: &str, announce: Announce) {
        let mut inner = self.inner.lock();
        inner
            .announce_subs
            .retain(|(filter, tx)| filter != aspect || tx.send(announce.clone()).is_ok());
    }

    /// Deliver a permanent delivery failure to the hook subscribers.
    pub fn publish_delivery_failure(&self, failure: FailedDelivery) {
        let mut inner = self.inner.lock();
        inner
            .failure_subs
            .retain(|tx| tx.send(failure.clone()).is_ok());
    }

    /// Make an identity immediately recallable.
    pub fn learn_identity(&self, hash: NodeHash, identity_hash: impl Into<String>) {
        self.inner.lock().identities.insert(hash, identity_hash.into());
    }

    /// Make an identity recallable only after a path request for it.
    pub fn stage_identity(&self, hash: NodeHash, identity_hash: impl Into<String>) {
        self.inner
            .lock()
            .staged_identities
            .insert(hash, identity_hash.into());
    }

    /// Script the statuses returned by successive `transfer_status`
    /// polls. The sequence must follow the legal state order.
    pub fn script_transfer(&self, statuses: Vec<SyncSnapshot>) {
        debug_assert!(statuses
            .windows(2)
            .all(|pair| pair[0].state == pair[1].state
                || pair[0].state.can_transition(pair[1].state)));
        self.inner.lock().script = statuses.into();
    }

    /// Have every pickup request play out a canned successful sync.
    pub fn enable_auto_script(&self) {
        self.inner.lock().auto_script = true;
    }

    pub fn outbound_relay(&self) -> Option<NodeHash> {
        self.inner.lock().outbound_relay.clone()
    }

    pub fn submitted(&self) -> Vec<OutboundMessage> {
        self.inner.lock().submitted.clone()
    }

    pub fn path_requests(&self) -> Vec<NodeHash> {
        self.inner.lock().path_requests.clone()
    }

    pub fn queued_requests(&self) -> usize {
        self.inner.lock().queued_requests
    }
}

#[async_trait]
impl MeshTransport for SimTransport {
    fn subscribe_announces(&self, aspect_filter: &str) -> mpsc::UnboundedReceiver<Announce> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .announce_subs
            .push((aspect_filter.to_string(), tx));
        rx
    }

    fn subscribe_delivery_failures(&self) -> mpsc::UnboundedReceiver<FailedDelivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().failure_subs.push(tx);
        rx
    }

    fn recall_identity(&self, hash: &NodeHash) -> Option<String> {
        self.inner.lock().identities.get(hash).cloned()
    }

    fn request_path(&self, hash: &NodeHash) {
        let mut inner = self.inner.lock();
        inner.path_requests.push(hash.clone());
        if let Some(identity) = inner.staged_identities.remove(hash) {
            inner.identities.insert(hash.clone(), identity);
        }
    }

    fn set_outbound_relay(&self, relay: Option<NodeHash>) {
        self.inner.lock().outbound_relay = relay;
    }

    async fn submit_message(&self, message: OutboundMessage) -> TransportResult<()> {
        self.inner.lock().submitted.push(message);
        Ok(())
    }

    async fn request_queued_messages(&self) -> TransportResult<()> {
        let mut inner = self.inner.lock();
        inner.queued_requests += 1;
        if inner.auto_script {
            let received = rand::thread_rng().gen_range(0..4);
            inner.script = VecDeque::from(vec![
                SyncSnapshot::at(SyncState::LinkEstablishing, 0.0),
                SyncSnapshot::at(SyncState::RequestSent, 0.2),
                SyncSnapshot::at(SyncState::Receiving, 0.6),
                SyncSnapshot::completed(received, 0),
            ]);
        }
        Ok(())
    }

    fn transfer_status(&self) -> SyncSnapshot {
        let mut inner = self.inner.lock();
        if let Some(next) = inner.script.pop_front() {
            inner.status = next;
        }
        inner.status.clone()
    }
}

/// Fixed peer directory backed by in-memory tables
#[derive(Default)]
pub struct StaticDirectory {
    inner: Mutex<DirectoryInner>,
}

#[derive(Default)]
struct DirectoryInner {
    /// identity hash -> display name
    names: HashMap<String, String>,

    /// contact name -> destination hash
    contacts: HashMap<String, NodeHash>,
}

impl StaticDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_peer(&self, identity_hash: impl Into<String>, display_name: impl Into<String>) {
        self.inner
            .lock()
            .names
            .insert(identity_hash.into(), display_name.into());
    }

    pub fn add_contact(&self, name: impl Into<String>, hash: NodeHash) {
        self.inner.lock().contacts.insert(name.into(), hash);
    }
}

impl PeerDirectory for StaticDirectory {
    fn display_name(&self, identity_hash: &str) -> Option<String> {
        self.inner.lock().names.get(identity_hash).cloned()
    }

    fn resolve_destination(&self, input: &str) -> Option<NodeHash> {
        if let Some(hash) = self.inner.lock().contacts.get(input) {
            return Some(hash.clone());
        }
        NodeHash::parse(input).ok()
    }

    fn contact_label(&self, hash: &NodeHash) -> String {
        let inner = self.inner.lock();
        inner
            .contacts
            .iter()
            .find(|(_, h)| *h == hash)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| format!("{}...", hash.short()))
    }
}
