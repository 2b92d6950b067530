//! Offline-delivery coordination for a mesh messaging host.
//!
//! Propagation nodes are store-and-forward relays that hold messages
//! for offline recipients. This crate keeps a durable registry of every
//! relay seen on the network, lets an operator pick one as the active
//! relay, silently re-routes permanently failed direct deliveries
//! through it, and periodically picks up messages queued there for the
//! local identity.
//!
//! The host side of the contract is the [`transport::MeshTransport`]
//! trait; everything else hangs off [`plugin::PropagationPlugin`].

pub mod announce;
pub mod commands;
pub mod plugin;
pub mod registry;
pub mod retry;
pub mod selector;
pub mod sync;
pub mod transport;

pub use plugin::{PluginEvent, PropagationPlugin};
pub use registry::{NodeRegistry, PropagationNode, Settings};
pub use transport::{MeshTransport, NodeHash, PeerDirectory};
