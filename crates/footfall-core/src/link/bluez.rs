//! BlueZ transport (Linux).
//!
//! Talks to `bluetoothd` over D-Bus through `bluer`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty};
use futures::{pin_mut, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::link::error::{LinkError, LinkResult};
use crate::link::transport::{
    never_disconnects, DeviceIdentity, DiscoveryFilter, DisconnectSignal, GattSession,
    NotificationChannel, Sighting, Transport,
};

/// [`Transport`] backed by the system BlueZ daemon.
pub struct BluezTransport {
    session: bluer::Session,
    adapter_name: Option<String>,
    discovery_timeout: Duration,
}

impl std::fmt::Debug for BluezTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezTransport")
            .field("adapter_name", &self.adapter_name)
            .field("discovery_timeout", &self.discovery_timeout)
            .finish_non_exhaustive()
    }
}

impl BluezTransport {
    /// Connect to `bluetoothd`.
    ///
    /// `adapter_name` selects an adapter such as `hci1`; `None` uses the
    /// default one.
    ///
    /// # Errors
    ///
    /// `TransportUnsupported` if the daemon cannot be reached.
    pub async fn new(adapter_name: Option<String>, discovery_timeout: Duration) -> LinkResult<Self> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| LinkError::TransportUnsupported(format!("cannot reach bluetoothd: {e}")))?;
        Ok(Self {
            session,
            adapter_name,
            discovery_timeout,
        })
    }

    async fn adapter(&self) -> LinkResult<Adapter> {
        let adapter = match &self.adapter_name {
            Some(name) => self.session.adapter(name),
            None => self.session.default_adapter().await,
        }
        .map_err(|e| LinkError::TransportUnsupported(format!("no Bluetooth adapter: {e}")))?;

        let powered = adapter
            .is_powered()
            .await
            .map_err(|e| LinkError::TransportUnsupported(e.to_string()))?;
        if !powered {
            info!(adapter = adapter.name(), "Powering on adapter");
            adapter.set_powered(true).await.map_err(|e| {
                LinkError::TransportUnsupported(format!("adapter is powered off: {e}"))
            })?;
        }
        Ok(adapter)
    }
}

#[async_trait]
impl Transport for BluezTransport {
    async fn discover(&self, filter: &DiscoveryFilter) -> LinkResult<DeviceIdentity> {
        let adapter = self.adapter().await?;
        let discovery_failed = |e: bluer::Error| LinkError::DiscoveryFailed(e.to_string());

        adapter
            .set_discovery_filter(bluer::DiscoveryFilter {
                transport: bluer::DiscoveryTransport::Le,
                ..Default::default()
            })
            .await
            .map_err(discovery_failed)?;
        // Property updates (a name from the scan response, late service
        // UUIDs) are re-reported as `DeviceAdded`.
        let events = adapter
            .discover_devices_with_changes()
            .await
            .map_err(discovery_failed)?;
        debug!(adapter = adapter.name(), "Scanning for sensor bridge");

        let sightings = events.filter_map(|event| {
            let adapter = &adapter;
            async move {
                let AdapterEvent::DeviceAdded(address) = event else {
                    return None;
                };
                let device = adapter.device(address).ok()?;
                let name = device.name().await.ok().flatten();
                let services = device.uuids().await.ok().flatten().unwrap_or_default();
                Some(Sighting {
                    identity: DeviceIdentity {
                        id: address.to_string(),
                        name,
                    },
                    services: services.into_iter().collect(),
                })
            }
        });
        let scan = filter.first_match(sightings);

        match tokio::time::timeout(self.discovery_timeout, scan).await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => Err(LinkError::DiscoveryFailed(
                "discovery ended without a match".into(),
            )),
            Err(_) => Err(LinkError::DiscoveryFailed(format!(
                "no matching device found within {} seconds",
                self.discovery_timeout.as_secs()
            ))),
        }
    }

    async fn open_session(&self, identity: &DeviceIdentity) -> LinkResult<Box<dyn GattSession>> {
        let address: Address = identity.id.parse().map_err(|e| {
            LinkError::SessionFailed(format!("invalid device address '{}': {e}", identity.id))
        })?;
        let adapter = self.adapter().await?;
        let session_failed = |e: bluer::Error| LinkError::SessionFailed(e.to_string());

        let device = adapter.device(address).map_err(session_failed)?;
        if !device.is_connected().await.map_err(session_failed)? {
            device.connect().await.map_err(session_failed)?;
        }
        debug!(%address, "Session established");

        Ok(Box::new(BluezSession {
            device,
            characteristic: Mutex::new(None),
        }))
    }
}

struct BluezSession {
    device: Device,
    characteristic: Mutex<Option<Characteristic>>,
}

impl BluezSession {
    fn slot(&self) -> MutexGuard<'_, Option<Characteristic>> {
        self.characteristic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn resolved(&self) -> Option<Characteristic> {
        self.slot().clone()
    }
}

#[async_trait]
impl GattSession for BluezSession {
    async fn resolve(&self, service: Uuid, characteristic: Uuid) -> LinkResult<()> {
        let session_failed = |e: bluer::Error| LinkError::SessionFailed(e.to_string());

        let mut found = None;
        for candidate in self.device.services().await.map_err(session_failed)? {
            if candidate.uuid().await.map_err(session_failed)? == service {
                found = Some(candidate);
                break;
            }
        }
        let service_handle = found.ok_or(LinkError::ServiceNotFound(service))?;

        for candidate in service_handle
            .characteristics()
            .await
            .map_err(session_failed)?
        {
            if candidate.uuid().await.map_err(session_failed)? == characteristic {
                *self.slot() = Some(candidate);
                debug!(%service, %characteristic, "Characteristic resolved");
                return Ok(());
            }
        }
        Err(LinkError::CharacteristicNotFound(characteristic))
    }

    async fn subscribe(&self) -> LinkResult<NotificationChannel> {
        let characteristic = self
            .resolved()
            .ok_or_else(|| LinkError::SubscriptionFailed("characteristic not resolved".into()))?;
        let payloads = characteristic
            .notify()
            .await
            .map_err(|e| LinkError::SubscriptionFailed(e.to_string()))?;
        Ok(NotificationChannel::new(payloads))
    }

    async fn write(&self, payload: &[u8]) -> LinkResult<()> {
        let characteristic = self
            .resolved()
            .ok_or_else(|| LinkError::WriteFailed("characteristic not resolved".into()))?;
        characteristic
            .write(payload)
            .await
            .map_err(|e| LinkError::WriteFailed(e.to_string()))
    }

    fn disconnected(&self) -> DisconnectSignal {
        let device = self.device.clone();
        Box::pin(async move {
            match device.events().await {
                Ok(events) => {
                    pin_mut!(events);
                    while let Some(event) = events.next().await {
                        if matches!(
                            event,
                            DeviceEvent::PropertyChanged(DeviceProperty::Connected(false))
                        ) {
                            return;
                        }
                    }
                }
                Err(err) => {
                    // Without property events the notification stream ending
                    // is the only disconnect signal left.
                    warn!(error = %err, "Cannot watch device connection state");
                    never_disconnects().await;
                }
            }
        })
    }

    async fn close(&self) -> LinkResult<()> {
        self.slot().take();
        if self.device.is_connected().await.unwrap_or(false) {
            self.device
                .disconnect()
                .await
                .map_err(|e| LinkError::SessionFailed(e.to_string()))?;
        }
        debug!(address = %self.device.address(), "Session closed");
        Ok(())
    }
}
