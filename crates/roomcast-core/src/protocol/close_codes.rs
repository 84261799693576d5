//! WebSocket close codes
//!
//! Status codes used when the engine closes a transport.

use serde::{Deserialize, Serialize};

/// Close codes sent to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure
    Normal = 1000,
    /// Server is shutting down
    GoingAway = 1001,
    /// No pong received within one heartbeat tick
    HeartbeatTimeout = 4000,
    /// Rejected by the admission pipeline
    Forbidden = 4003,
    /// No namespace registered for the requested path
    NamespaceNotFound = 4004,
    /// The namespace was destroyed while the connection was open
    NamespaceDestroyed = 4005,
    /// The underlying transport reported an error
    TransportError = 4006,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            4000 => Some(Self::HeartbeatTimeout),
            4003 => Some(Self::Forbidden),
            4004 => Some(Self::NamespaceNotFound),
            4005 => Some(Self::NamespaceDestroyed),
            4006 => Some(Self::TransportError),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Default close reason sent with this code
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Normal => "normal closure",
            Self::GoingAway => "server shutting down",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::Forbidden => "forbidden",
            Self::NamespaceNotFound => "namespace not found",
            Self::NamespaceDestroyed => "namespace destroyed",
            Self::TransportError => "transport error",
        }
    }

    /// Check if a client may reconnect after this close code
    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        matches!(
            self,
            Self::GoingAway | Self::HeartbeatTimeout | Self::NamespaceDestroyed | Self::TransportError
        )
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
