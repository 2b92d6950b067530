//! Wire-facing types shared with the host transport

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by the host transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no identity known for {0}")]
    IdentityUnknown(NodeHash),

    #[error("submission rejected: {0}")]
    SubmitRejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Raised when operator input cannot be normalized into a hash
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid destination hash: {0:?}")]
pub struct HashParseError(pub String);

/// A normalized destination hash: lowercase hex with display
/// decorations (`<`, `>`, `:`, whitespace) stripped.
///
/// All hashes entering the system pass through [`NodeHash::parse`], so
/// two spellings of the same address always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHash(String);

impl NodeHash {
    pub fn parse(raw: &str) -> Result<Self, HashParseError> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && !matches!(c, '<' | '>' | ':'))
            .collect::<String>()
            .to_lowercase();

        if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashParseError(raw.to_string()));
        }

        Ok(Self(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex characters, for operator-facing output.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(16)]
    }

    /// First 8 hex characters, used in generated display names.
    pub fn tag(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// How an outbound message should be (or was being) delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMethod {
    /// Immediate delivery over an established link
    Direct,

    /// Best-effort single-packet delivery
    Opportunistic,

    /// Store-and-forward via a propagation node
    Propagated,
}

/// Structured message fields carried alongside content
pub type MessageFields = HashMap<String, serde_json::Value>;

/// An outbound message handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub destination: NodeHash,
    pub content: String,
    pub title: String,
    pub fields: MessageFields,
    pub method: DeliveryMethod,
}

/// A discovery event received from the network
#[derive(Debug, Clone)]
pub struct Announce {
    /// Hash of the announcing destination
    pub destination_hash: NodeHash,

    /// Hash of the announced cryptographic identity
    pub identity_hash: String,

    /// Opaque capability payload, if the announce carried one
    pub app_data: Option<Vec<u8>>,
}

/// A message whose direct delivery permanently failed, captured at the
/// moment the host gave up on it. Alive only for one retry attempt.
#[derive(Debug, Clone)]
pub struct FailedDelivery {
    pub destination: NodeHash,
    pub content: String,
    pub title: String,
    pub fields: MessageFields,

    /// The delivery method the message was originally sent with
    pub desired_method: DeliveryMethod,
}
