use thiserror::Error;

use crate::presence::ConnectionId;

/// Error types for the presence server
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Inbound protocol errors
    #[error("Invalid inbound message: {0}")]
    InvalidMessage(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Delivery errors
    #[error("Observer {0} is no longer reachable")]
    ObserverGone(ConnectionId),

    #[error("Presence dispatcher is not running")]
    DispatcherUnavailable,

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to load user directory: {0}")]
    DirectoryLoad(#[from] std::io::Error),

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using PresenceError
pub type Result<T> = std::result::Result<T, PresenceError>;

impl PresenceError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        PresenceError::Internal(msg.into())
    }

    /// Helper to create configuration errors
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        PresenceError::InvalidConfiguration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PresenceError::ObserverGone(ConnectionId::new(7));
        assert_eq!(err.to_string(), "Observer conn-7 is no longer reachable");
    }

    #[test]
    fn test_error_helpers() {
        let err = PresenceError::internal("Something went wrong");
        assert!(matches!(err, PresenceError::Internal(_)));

        let err = PresenceError::invalid_config("SERVER_PORT");
        assert_eq!(err.to_string(), "Invalid configuration: SERVER_PORT");
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PresenceError = parse_err.into();
        assert!(matches!(err, PresenceError::SerializationFailed(_)));
    }
}
