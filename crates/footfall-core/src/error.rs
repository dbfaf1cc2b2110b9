//! Unified error type for the footfall core library.
//!
//! Each module keeps its own error type ([`LinkError`], [`ConfigError`]);
//! [`FootfallError`] is what the public facade returns and what outer layers
//! convert into HTTP responses.
//!
//! # Example
//!
//! ```rust
//! use footfall_core::error::{FootfallError, Result};
//! use footfall_core::link::LinkError;
//!
//! fn require_link(connected: bool) -> Result<()> {
//!     if !connected {
//!         return Err(LinkError::NotConnected.into());
//!     }
//!     Ok(())
//! }
//!
//! assert_eq!(require_link(false).unwrap_err().http_status_code(), 409);
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::link::LinkError;

/// The unified error type for all footfall operations.
#[derive(Debug, Error)]
pub enum FootfallError {
    // =========================================================================
    // LINK ERRORS
    // =========================================================================
    /// A link operation failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),
}

/// A specialized [`Result`] type for footfall operations.
pub type Result<T> = std::result::Result<T, FootfallError>;

impl FootfallError {
    /// Returns the wrapped link error, if any.
    #[inline]
    #[must_use]
    pub const fn as_link_error(&self) -> Option<&LinkError> {
        match self {
            Self::Link(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` if retrying later may succeed without user intervention.
    ///
    /// A bridge out of range or a flaky session usually recovers; a missing
    /// Bluetooth stack or a wrong GATT profile does not.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Link(
                LinkError::DiscoveryFailed(_)
                    | LinkError::SessionFailed(_)
                    | LinkError::SubscriptionFailed(_)
                    | LinkError::WriteFailed(_)
                    | LinkError::RemoteDisconnected
                    | LinkError::ConnectInProgress
                    | LinkError::Cancelled
            )
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::Link(err) => match err {
                // 409 Conflict - the call does not fit the current link state
                LinkError::ConnectInProgress
                | LinkError::AlreadyConnected
                | LinkError::NotConnected
                | LinkError::Cancelled => 409,

                // 424 Failed Dependency - the device lacks the expected profile
                LinkError::ServiceNotFound(_) | LinkError::CharacteristicNotFound(_) => 424,

                // 502 Bad Gateway - the device rejected what we sent
                LinkError::WriteFailed(_) | LinkError::DecodeUnrecognized => 502,

                // 503 Service Unavailable - radio or device unreachable
                LinkError::TransportUnsupported(_)
                | LinkError::DiscoveryFailed(_)
                | LinkError::SessionFailed(_)
                | LinkError::SubscriptionFailed(_)
                | LinkError::RemoteDisconnected
                | LinkError::ManagerClosed => 503,
            },

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Link(err) => err.error_code(),
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<ConfigError> for FootfallError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_classification() {
        let err = FootfallError::from(LinkError::NotConnected);
        assert_eq!(err.as_link_error(), Some(&LinkError::NotConnected));
        assert_eq!(
            FootfallError::ConfigNotFound(PathBuf::from("/test")).as_link_error(),
            None
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(FootfallError::from(LinkError::DiscoveryFailed("timeout".into())).is_recoverable());
        assert!(FootfallError::from(LinkError::RemoteDisconnected).is_recoverable());
        assert!(!FootfallError::from(LinkError::TransportUnsupported("no hci0".into()))
            .is_recoverable());
        assert!(!FootfallError::from(LinkError::ServiceNotFound(uuid::Uuid::nil()))
            .is_recoverable());
        assert!(!FootfallError::ConfigParseError("x".into()).is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        let status = |err: LinkError| FootfallError::from(err).http_status_code();

        assert_eq!(status(LinkError::ConnectInProgress), 409);
        assert_eq!(status(LinkError::AlreadyConnected), 409);
        assert_eq!(status(LinkError::NotConnected), 409);
        assert_eq!(status(LinkError::ServiceNotFound(uuid::Uuid::nil())), 424);
        assert_eq!(
            status(LinkError::CharacteristicNotFound(uuid::Uuid::nil())),
            424
        );
        assert_eq!(status(LinkError::WriteFailed("gatt".into())), 502);
        assert_eq!(status(LinkError::TransportUnsupported("none".into())), 503);
        assert_eq!(status(LinkError::DiscoveryFailed("timeout".into())), 503);
        assert_eq!(
            FootfallError::ConfigNotFound(PathBuf::new()).http_status_code(),
            404
        );
        assert_eq!(
            FootfallError::ConfigValidationError("x".into()).http_status_code(),
            422
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            FootfallError::from(LinkError::AlreadyConnected).error_code(),
            "ALREADY_CONNECTED"
        );
        assert_eq!(
            FootfallError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_config_validation_errors() {
        let err: FootfallError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "a".into(),
                message: "bad".into(),
            },
            ConfigError::ValidationError {
                field: "b".into(),
                message: "worse".into(),
            },
        ])
        .into();

        match err {
            FootfallError::ConfigValidationError(message) => {
                assert!(message.contains("'a'"));
                assert!(message.contains("; "));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_link_error_display_is_transparent() {
        let err = FootfallError::from(LinkError::NotConnected);
        assert_eq!(err.to_string(), LinkError::NotConnected.to_string());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<FootfallError>();
        assert_sync::<FootfallError>();
    }
}
