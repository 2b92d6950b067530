//! Sync transfer states as exposed by the transport

use serde::{Deserialize, Serialize};

/// State of one pickup transaction against the active propagation node.
///
/// The discriminants mirror the wire codes the transport reports:
/// `0x00..=0x07` for the forward path, `0xf0` and above for failures.
/// `Complete` and every failure state are terminal for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SyncState {
    Idle = 0x00,
    PathRequested = 0x01,
    LinkEstablishing = 0x02,
    LinkEstablished = 0x03,
    RequestSent = 0x04,
    Receiving = 0x05,
    ResponseReceived = 0x06,
    Complete = 0x07,
    NoPath = 0xf0,
    LinkFailed = 0xf1,
    TransferFailed = 0xf2,
    NoIdentityReceived = 0xf3,
    NoAccess = 0xf4,
    Failed = 0xfe,
}

impl SyncState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let state = match code {
            0x00 => Self::Idle,
            0x01 => Self::PathRequested,
            0x02 => Self::LinkEstablishing,
            0x03 => Self::LinkEstablished,
            0x04 => Self::RequestSent,
            0x05 => Self::Receiving,
            0x06 => Self::ResponseReceived,
            0x07 => Self::Complete,
            0xf0 => Self::NoPath,
            0xf1 => Self::LinkFailed,
            0xf2 => Self::TransferFailed,
            0xf3 => Self::NoIdentityReceived,
            0xf4 => Self::NoAccess,
            0xfe => Self::Failed,
            _ => return None,
        };
        Some(state)
    }

    pub fn is_failure(self) -> bool {
        self.code() >= 0xf0
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Complete || self.is_failure()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::PathRequested => "PATH_REQUESTED",
            Self::LinkEstablishing => "LINK_ESTABLISHING",
            Self::LinkEstablished => "LINK_ESTABLISHED",
            Self::RequestSent => "REQUEST_SENT",
            Self::Receiving => "RECEIVING",
            Self::ResponseReceived => "RESPONSE_RECEIVED",
            Self::Complete => "COMPLETE",
            Self::NoPath => "NO_PATH",
            Self::LinkFailed => "LINK_FAILED",
            Self::TransferFailed => "TRANSFER_FAILED",
            Self::NoIdentityReceived => "NO_IDENTITY_RCVD",
            Self::NoAccess => "NO_ACCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Human-readable reason for a failure state, `None` otherwise.
    pub fn failure_reason(self) -> Option<&'static str> {
        match self {
            Self::NoPath => Some("No path to propagation node"),
            Self::LinkFailed => Some("Link failed"),
            Self::TransferFailed => Some("Transfer failed"),
            Self::NoIdentityReceived => Some("No identity received"),
            Self::NoAccess => Some("No access"),
            Self::Failed => Some("Failed"),
            _ => None,
        }
    }

    /// Whether one session may legally move from `self` to `next`.
    /// Any non-terminal state may fall into any failure state; forward
    /// progress otherwise follows the sequential order.
    pub fn can_transition(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_failure() {
            return true;
        }
        next.code() > self.code()
    }
}

/// Point-in-time view of the current sync session
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub state: SyncState,

    /// Transfer progress in `0.0..=1.0`
    pub progress: f32,

    /// Messages received by the last completed sync, if any
    pub last_result: Option<u32>,

    /// Duplicates skipped by the last completed sync, if any
    pub last_duplicates: Option<u32>,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            progress: 0.0,
            last_result: None,
            last_duplicates: None,
        }
    }
}

impl SyncSnapshot {
    pub fn at(state: SyncState, progress: f32) -> Self {
        Self {
            state,
            progress,
            ..Self::default()
        }
    }

    pub fn completed(received: u32, duplicates: u32) -> Self {
        Self {
            state: SyncState::Complete,
            progress: 1.0,
            last_result: Some(received),
            last_duplicates: Some(duplicates),
        }
    }
}
