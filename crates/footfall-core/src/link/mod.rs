//! BLE link to the sensor bridge.
//!
//! - [`manager`] - connection state machine and notification pump
//! - [`transport`] - the radio-facing traits the manager is written against
//! - `bluez` - BlueZ implementation (feature `bluetooth`, Linux only)
//! - `mock` - in-memory implementation (feature `mock-bluetooth`)

#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod error;
pub mod manager;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

pub use error::{LinkError, LinkResult};
pub use manager::{LinkEvent, LinkManager, LinkState, LinkStatus};
pub use transport::{
    DeviceIdentity, DiscoveryFilter, DisconnectSignal, GattSession, LinkProfile,
    NotificationChannel, Sighting, Transport, UnsupportedTransport,
};

/// Open the transport this build was compiled for.
///
/// Never fails: if the Bluetooth stack cannot be reached the returned
/// transport reports `TransportUnsupported` on every connect attempt, so the
/// rest of the application (and the synthetic source) keeps working.
pub async fn open_transport(adapter: Option<&str>, discovery_timeout: Duration) -> Arc<dyn Transport> {
    #[cfg(feature = "mock-bluetooth")]
    {
        let _ = (adapter, discovery_timeout);
        tracing::info!("Using in-memory mock transport");
        Arc::new(mock::MockTransport::new())
    }

    #[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
    {
        match bluez::BluezTransport::new(adapter.map(str::to_string), discovery_timeout).await {
            Ok(transport) => {
                tracing::info!("BlueZ transport ready");
                Arc::new(transport)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Bluetooth unavailable, link commands will fail");
                Arc::new(UnsupportedTransport::new(err.to_string()))
            }
        }
    }

    #[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
    {
        let _ = (adapter, discovery_timeout);
        tracing::warn!("Built without Bluetooth support, link commands will fail");
        Arc::new(UnsupportedTransport::new(
            "built without the `bluetooth` feature",
        ))
    }
}
