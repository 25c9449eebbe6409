//! Connection lifecycle states.
//!
//! The lifecycle controller moves through these states as it scans for,
//! connects to and discovers the transmitter.

use chrono::{DateTime, Utc};

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Radio not powered on; nothing happening.
    #[default]
    Idle,
    /// Scanning for the transmitter.
    Scanning,
    /// Waiting for the link to come up.
    Connecting,
    /// Waiting for the primary service.
    DiscoveringServices,
    /// Waiting for the characteristics of the primary service.
    DiscoveringCharacteristics,
    /// Every characteristic resolved; operations may be issued.
    Ready,
    /// The link went down and a rescan is pending.
    Disconnected,
}

impl ConnectionState {
    /// Check if the session is ready for operations.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "DiscoveringServices"),
            Self::DiscoveringCharacteristics => write!(f, "DiscoveringCharacteristics"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Event for lifecycle state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// The new state.
    pub state: ConnectionState,
    /// Identifier of the tracked peripheral, if any.
    pub peripheral_id: Option<String>,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

impl ConnectionEvent {
    /// Create an event stamped with the current time.
    pub fn now(state: ConnectionState, peripheral_id: Option<String>) -> Self {
        Self {
            state,
            peripheral_id,
            at: Utc::now(),
        }
    }
}
