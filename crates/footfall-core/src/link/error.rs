//! Errors raised by the BLE link.

use thiserror::Error;
use uuid::Uuid;

/// A specialized [`Result`] type for link operations.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Every way a link operation can fail.
///
/// None of these are fatal: after any of them the manager is back in
/// `Disconnected`, or still `Connected` for a failed write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================
    /// No usable Bluetooth stack on this host.
    #[error("Bluetooth is not available on this host: {0}")]
    TransportUnsupported(String),

    /// Scanning did not turn up a matching bridge.
    #[error("Device discovery failed: {0}")]
    DiscoveryFailed(String),

    /// The device was found but the GATT session could not be established.
    #[error("Could not open a session with the device: {0}")]
    SessionFailed(String),

    /// The device does not expose the serial bridge service.
    #[error("Service {0} not found on device")]
    ServiceNotFound(Uuid),

    /// The service is there but lacks the notify/write characteristic.
    #[error("Characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    /// Enabling notifications failed.
    #[error("Could not subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Writing to the characteristic failed.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The device dropped the connection on its own.
    #[error("Device disconnected")]
    RemoteDisconnected,

    /// A notification payload was not a recognized token.
    #[error("Unrecognized payload")]
    DecodeUnrecognized,

    // =========================================================================
    // STATE ERRORS
    // =========================================================================
    /// `connect()` while another connect is running.
    #[error("A connection attempt is already in progress")]
    ConnectInProgress,

    /// `connect()` while already connected.
    #[error("Already connected to a device")]
    AlreadyConnected,

    /// An operation that needs a live link was called without one.
    #[error("Not connected. Connect to a device first.")]
    NotConnected,

    /// The connect sequence was aborted by `disconnect()`.
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// The manager task has shut down.
    #[error("Link manager is not running")]
    ManagerClosed,
}

impl LinkError {
    /// Returns `true` when the call was refused because of the current state.
    #[inline]
    #[must_use]
    pub const fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectInProgress | Self::AlreadyConnected | Self::NotConnected
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::TransportUnsupported(_) => "TRANSPORT_UNSUPPORTED",
            Self::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            Self::SessionFailed(_) => "SESSION_FAILED",
            Self::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            Self::CharacteristicNotFound(_) => "CHARACTERISTIC_NOT_FOUND",
            Self::SubscriptionFailed(_) => "SUBSCRIPTION_FAILED",
            Self::WriteFailed(_) => "WRITE_FAILED",
            Self::RemoteDisconnected => "REMOTE_DISCONNECTED",
            Self::DecodeUnrecognized => "DECODE_UNRECOGNIZED",
            Self::ConnectInProgress => "CONNECT_IN_PROGRESS",
            Self::AlreadyConnected => "ALREADY_CONNECTED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::Cancelled => "CANCELLED",
            Self::ManagerClosed => "MANAGER_CLOSED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(LinkError::ConnectInProgress.is_state_error());
        assert!(LinkError::AlreadyConnected.is_state_error());
        assert!(LinkError::NotConnected.is_state_error());
        assert!(!LinkError::Cancelled.is_state_error());
    }

    #[test]
    fn test_display_carries_reason() {
        let err = LinkError::SessionFailed("le-connection-abort-by-local".into());
        assert!(err.to_string().contains("le-connection-abort-by-local"));

        let err = LinkError::CharacteristicNotFound(crate::protocol::CHARACTERISTIC_UUID);
        assert!(err.to_string().contains("0000ffe1"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LinkError::NotConnected.error_code(), "NOT_CONNECTED");
        assert_eq!(
            LinkError::TransportUnsupported(String::new()).error_code(),
            "TRANSPORT_UNSUPPORTED"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<LinkError>();
        assert_sync::<LinkError>();
    }
}
