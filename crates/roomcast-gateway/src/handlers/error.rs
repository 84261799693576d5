//! Handler error types

use roomcast_core::{Envelope, NamespaceError};
use thiserror::Error;

/// Handler error type
///
/// Reported to the sending client as an `error` event; the connection
/// stays open.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Invalid payload received
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The connection no longer belongs to a live namespace
    #[error("Namespace is gone")]
    NamespaceGone,

    /// Room bookkeeping failed
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
}

impl HandlerError {
    /// Code carried in the `error` event
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::NamespaceGone | Self::Namespace(NamespaceError::Destroyed) => {
                "NAMESPACE_DESTROYED"
            }
            Self::Namespace(NamespaceError::UnknownConnection(_)) => "UNKNOWN_CONNECTION",
            Self::Namespace(NamespaceError::RoomExists(_)) => "ROOM_EXISTS",
        }
    }

    /// `error` event for the client
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        Envelope::error(self.code(), self.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// Handler result type
pub type HandlerResult<T> = Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope() {
        let envelope = HandlerError::InvalidPayload("room name required".to_string()).to_envelope();

        assert_eq!(envelope.event, "error");
        assert_eq!(envelope.data["code"], "INVALID_PAYLOAD");
        assert_eq!(envelope.data["message"], "Invalid payload: room name required");
    }

    #[test]
    fn test_namespace_error_codes() {
        assert_eq!(
            HandlerError::from(NamespaceError::Destroyed).code(),
            "NAMESPACE_DESTROYED"
        );
        assert_eq!(HandlerError::NamespaceGone.code(), "NAMESPACE_DESTROYED");
    }
}
