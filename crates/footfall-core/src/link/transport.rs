//! Transport port.
//!
//! The link manager only talks to the radio through these traits, so the
//! BlueZ backend and the in-memory mock are interchangeable.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::link::error::LinkResult;
use crate::protocol;

/// Identity of a discovered bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "98:D3:31:F5:2A:10",
    "name": "HC-05"
}))]
pub struct DeviceIdentity {
    /// Opaque transport id (the MAC address for BlueZ).
    #[schema(example = "98:D3:31:F5:2A:10")]
    pub id: String,

    /// Advertised name, if the device broadcast one.
    #[schema(example = "HC-05")]
    pub name: Option<String>,
}

impl DeviceIdentity {
    /// Name for log lines and notifications.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("HC-05 device")
    }
}

/// Which devices are acceptable during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// Service that a bridge should advertise.
    pub service: Uuid,

    /// Name prefix accepted from bridges that do not advertise the service.
    pub name_prefix: String,
}

impl DiscoveryFilter {
    /// Whether an advertisement matches: service first, name prefix as fallback.
    pub fn matches<'a>(
        &self,
        mut advertised: impl Iterator<Item = &'a Uuid>,
        name: Option<&str>,
    ) -> bool {
        if advertised.any(|uuid| *uuid == self.service) {
            return true;
        }
        !self.name_prefix.is_empty()
            && name.is_some_and(|name| name.starts_with(&self.name_prefix))
    }

    /// First sighting that matches, in scan order.
    ///
    /// A device may be sighted several times while its name and service list
    /// fill in, so a miss is never final.
    pub async fn first_match(
        &self,
        sightings: impl Stream<Item = Sighting>,
    ) -> Option<DeviceIdentity> {
        futures::pin_mut!(sightings);
        while let Some(sighting) = sightings.next().await {
            if self.matches(sighting.services.iter(), sighting.identity.name.as_deref()) {
                return Some(sighting.identity);
            }
            tracing::trace!(
                id = %sighting.identity.id,
                name = ?sighting.identity.name,
                "Skipping device"
            );
        }
        None
    }
}

/// What a scan knew about a device at one moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// The device, with its name if one was known yet.
    pub identity: DeviceIdentity,

    /// Advertised services known so far.
    pub services: Vec<Uuid>,
}

/// GATT identifiers and discovery rules for one bridge model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkProfile {
    /// Service holding the data characteristic.
    pub service: Uuid,

    /// Notify/write characteristic.
    pub characteristic: Uuid,

    /// Fallback discovery name prefix.
    pub name_prefix: String,
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            service: protocol::SERVICE_UUID,
            characteristic: protocol::CHARACTERISTIC_UUID,
            name_prefix: protocol::NAME_PREFIX.to_string(),
        }
    }
}

impl LinkProfile {
    /// Discovery filter derived from this profile.
    #[must_use]
    pub fn discovery_filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            service: self.service,
            name_prefix: self.name_prefix.clone(),
        }
    }
}

/// Inbound notification payloads, in arrival order.
pub struct NotificationChannel {
    payloads: BoxStream<'static, Vec<u8>>,
}

impl NotificationChannel {
    /// Wrap a transport notification stream.
    pub fn new(payloads: impl Stream<Item = Vec<u8>> + Send + 'static) -> Self {
        Self {
            payloads: payloads.boxed(),
        }
    }

    /// Next payload, or `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.payloads.next().await
    }
}

impl std::fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationChannel").finish_non_exhaustive()
    }
}

/// Resolves once the transport reports that the device went away.
pub type DisconnectSignal = Pin<Box<dyn std::future::Future<Output = ()> + Send + 'static>>;

/// Entry point into a radio stack.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Scan until a device matching `filter` shows up.
    ///
    /// Implementations own the scan timeout and report it as
    /// `DiscoveryFailed`.
    async fn discover(&self, filter: &DiscoveryFilter) -> LinkResult<DeviceIdentity>;

    /// Establish a transport-level session with a discovered device.
    async fn open_session(&self, device: &DeviceIdentity) -> LinkResult<Box<dyn GattSession>>;
}

/// A live session with one device.
///
/// Sessions are shared between the manager and its pump task, hence `&self`
/// everywhere. `close` must be safe to call more than once.
#[async_trait]
pub trait GattSession: Send + Sync {
    /// Locate the service and characteristic that later calls operate on.
    async fn resolve(&self, service: Uuid, characteristic: Uuid) -> LinkResult<()>;

    /// Enable notifications on the resolved characteristic.
    async fn subscribe(&self) -> LinkResult<NotificationChannel>;

    /// Write raw bytes to the resolved characteristic.
    async fn write(&self, payload: &[u8]) -> LinkResult<()>;

    /// Future that completes when the device disconnects on its own.
    fn disconnected(&self) -> DisconnectSignal;

    /// Tear down notifications and the session.
    async fn close(&self) -> LinkResult<()>;
}

/// Transport used when the host has no Bluetooth support compiled in or the
/// stack could not be opened. Every connect attempt fails cleanly.
#[derive(Debug, Clone)]
pub struct UnsupportedTransport {
    reason: String,
}

impl UnsupportedTransport {
    /// Create a transport that always reports `reason`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Transport for UnsupportedTransport {
    async fn discover(&self, _filter: &DiscoveryFilter) -> LinkResult<DeviceIdentity> {
        Err(crate::link::LinkError::TransportUnsupported(
            self.reason.clone(),
        ))
    }

    async fn open_session(&self, _device: &DeviceIdentity) -> LinkResult<Box<dyn GattSession>> {
        Err(crate::link::LinkError::TransportUnsupported(
            self.reason.clone(),
        ))
    }
}

/// A signal that never fires, for sessions without disconnect reporting.
#[must_use]
pub fn never_disconnects() -> DisconnectSignal {
    Box::pin(futures::future::pending())
}
