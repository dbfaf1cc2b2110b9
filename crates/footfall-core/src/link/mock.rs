//! In-memory transport for tests and hardware-free development.
//!
//! A [`MockTransport`] always "discovers" one bridge. Once a session is open,
//! [`MockTransport::device`] hands out a [`MockDevice`] that can push
//! notification payloads, drop the connection from the remote side, and
//! report what was written to it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::link::error::{LinkError, LinkResult};
use crate::link::transport::{
    DeviceIdentity, DiscoveryFilter, DisconnectSignal, GattSession, NotificationChannel,
    Sighting, Transport,
};
use crate::protocol;

/// Step of the connect sequence that a [`MockTransport`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// No device found.
    Discovery,
    /// Session refused.
    Session,
    /// Service missing.
    Service,
    /// Characteristic missing.
    Characteristic,
    /// Notifications cannot be enabled.
    Subscribe,
    /// Writes fail.
    Write,
}

#[derive(Debug, Clone)]
struct MockConfig {
    identity: DeviceIdentity,
    advertised: Vec<Uuid>,
    failure: Option<MockFailure>,
    discovery_delay: Duration,
    session_delay: Duration,
    bind_delay: Duration,
}

#[derive(Debug)]
struct Shared {
    config: Mutex<MockConfig>,
    open_sessions: AtomicUsize,
    sessions_opened: AtomicUsize,
    current: Mutex<Option<MockDevice>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable in-memory [`Transport`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport with one HC-05 bridge in range.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                config: Mutex::new(MockConfig {
                    identity: DeviceIdentity {
                        id: "98:D3:31:F5:2A:10".to_string(),
                        name: Some("HC-05".to_string()),
                    },
                    advertised: vec![protocol::SERVICE_UUID],
                    failure: None,
                    discovery_delay: Duration::ZERO,
                    session_delay: Duration::ZERO,
                    bind_delay: Duration::ZERO,
                }),
                open_sessions: AtomicUsize::new(0),
                sessions_opened: AtomicUsize::new(0),
                current: Mutex::new(None),
            }),
        }
    }

    /// Fail the given step on every following attempt (`None` to heal).
    pub fn fail_at(&self, failure: Option<MockFailure>) {
        lock(&self.shared.config).failure = failure;
    }

    /// Make discovery take `delay` before answering.
    pub fn set_discovery_delay(&self, delay: Duration) {
        lock(&self.shared.config).discovery_delay = delay;
    }

    /// Make session establishment take `delay`.
    pub fn set_session_delay(&self, delay: Duration) {
        lock(&self.shared.config).session_delay = delay;
    }

    /// Make characteristic resolution take `delay`, with the session already open.
    pub fn set_bind_delay(&self, delay: Duration) {
        lock(&self.shared.config).bind_delay = delay;
    }

    /// Change what the simulated bridge advertises.
    pub fn set_advertisement(&self, name: Option<&str>, services: Vec<Uuid>) {
        let mut config = lock(&self.shared.config);
        config.identity.name = name.map(str::to_string);
        config.advertised = services;
    }

    /// The device behind the most recently opened session.
    #[must_use]
    pub fn device(&self) -> Option<MockDevice> {
        lock(&self.shared.current).clone()
    }

    /// Sessions opened and not yet closed.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }

    /// Sessions opened over the transport's lifetime.
    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.shared.sessions_opened.load(Ordering::SeqCst)
    }

    fn config(&self) -> MockConfig {
        lock(&self.shared.config).clone()
    }

    fn failure(&self) -> Option<MockFailure> {
        lock(&self.shared.config).failure
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn discover(&self, filter: &DiscoveryFilter) -> LinkResult<DeviceIdentity> {
        let config = self.config();
        if !config.discovery_delay.is_zero() {
            tokio::time::sleep(config.discovery_delay).await;
        }
        if config.failure == Some(MockFailure::Discovery) {
            return Err(LinkError::DiscoveryFailed(
                "no matching device in range".into(),
            ));
        }
        let sighting = Sighting {
            identity: config.identity,
            services: config.advertised,
        };
        filter
            .first_match(futures::stream::iter([sighting]))
            .await
            .ok_or_else(|| LinkError::DiscoveryFailed("no matching device in range".into()))
    }

    async fn open_session(&self, _device: &DeviceIdentity) -> LinkResult<Box<dyn GattSession>> {
        let config = self.config();
        if !config.session_delay.is_zero() {
            tokio::time::sleep(config.session_delay).await;
        }
        if config.failure == Some(MockFailure::Session) {
            return Err(LinkError::SessionFailed("connection refused".into()));
        }

        let (payload_tx, payload_rx) = mpsc::unbounded_channel();
        let (remote_drop, _) = watch::channel(false);
        let link = Arc::new(MockLink {
            payloads: Mutex::new(Some(payload_tx)),
            receiver: Mutex::new(Some(payload_rx)),
            remote_drop,
            written: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            resolved: AtomicBool::new(false),
        });

        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        self.shared.sessions_opened.fetch_add(1, Ordering::SeqCst);
        *lock(&self.shared.current) = Some(MockDevice { link: link.clone() });

        Ok(Box::new(MockSession {
            transport: self.clone(),
            link,
        }))
    }
}

#[derive(Debug)]
struct MockLink {
    payloads: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    remote_drop: watch::Sender<bool>,
    written: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
    resolved: AtomicBool,
}

/// Remote end of a mock session.
#[derive(Debug, Clone)]
pub struct MockDevice {
    link: Arc<MockLink>,
}

impl MockDevice {
    /// Deliver a notification payload. Returns `false` if nobody can receive it.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> bool {
        lock(&self.link.payloads)
            .as_ref()
            .is_some_and(|tx| tx.send(payload.into()).is_ok())
    }

    /// Simulate the bridge powering off or walking out of range.
    pub fn drop_connection(&self) {
        self.link.remote_drop.send_replace(true);
        lock(&self.link.payloads).take();
    }

    /// Everything written to the characteristic so far.
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.link.written).clone()
    }

    /// Whether the host side closed this session.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::SeqCst)
    }
}

struct MockSession {
    transport: MockTransport,
    link: Arc<MockLink>,
}

#[async_trait]
impl GattSession for MockSession {
    async fn resolve(&self, service: Uuid, characteristic: Uuid) -> LinkResult<()> {
        let delay = self.transport.config().bind_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.transport.failure() {
            Some(MockFailure::Service) => Err(LinkError::ServiceNotFound(service)),
            Some(MockFailure::Characteristic) => {
                Err(LinkError::CharacteristicNotFound(characteristic))
            }
            _ => {
                self.link.resolved.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn subscribe(&self) -> LinkResult<NotificationChannel> {
        if self.transport.failure() == Some(MockFailure::Subscribe) {
            return Err(LinkError::SubscriptionFailed(
                "notify not permitted".into(),
            ));
        }
        let receiver = lock(&self.link.receiver)
            .take()
            .ok_or_else(|| LinkError::SubscriptionFailed("already subscribed".into()))?;

        Ok(NotificationChannel::new(futures::stream::unfold(
            receiver,
            |mut rx| async move { rx.recv().await.map(|payload| (payload, rx)) },
        )))
    }

    async fn write(&self, payload: &[u8]) -> LinkResult<()> {
        if self.link.closed.load(Ordering::SeqCst) || *self.link.remote_drop.borrow() {
            return Err(LinkError::WriteFailed("device not connected".into()));
        }
        if !self.link.resolved.load(Ordering::SeqCst) {
            return Err(LinkError::WriteFailed("characteristic not resolved".into()));
        }
        if self.transport.failure() == Some(MockFailure::Write) {
            return Err(LinkError::WriteFailed("GATT write rejected".into()));
        }
        lock(&self.link.written).push(payload.to_vec());
        Ok(())
    }

    fn disconnected(&self) -> DisconnectSignal {
        let mut remote_drop = self.link.remote_drop.subscribe();
        Box::pin(async move {
            let _ = remote_drop.wait_for(|dropped| *dropped).await;
        })
    }

    async fn close(&self) -> LinkResult<()> {
        if !self.link.closed.swap(true, Ordering::SeqCst) {
            lock(&self.link.payloads).take();
            self.transport
                .shared
                .open_sessions
                .fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
