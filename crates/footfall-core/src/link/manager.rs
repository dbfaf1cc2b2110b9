//! BLE link lifecycle.
//!
//! A [`LinkManager`] is a cheap handle to one actor task. The actor owns the
//! connection state machine and processes commands strictly one at a time:
//!
//! ```text
//!             connect()                 subscribed
//! Disconnected ────────▶ Connecting ─────────────▶ Connected
//!      ▲                    │    │                     │
//!      │      any step fails│    │disconnect()         │disconnect() or
//!      │                    ▼    │                     │remote drop
//!      └────────────────  Failed ◀┘ (cancelled)        │
//!      └───────────────────────────────────────────────┘
//! ```
//!
//! The connect sequence (discover → open session → resolve → subscribe) runs
//! in its own task so that `disconnect()` can abort it and the caller dropping
//! its future never strands the manager in `Connecting`. Whatever the
//! sequence acquired is released before the manager reports `Disconnected`.
//!
//! While connected, a pump task reads the notification channel in arrival
//! order, decodes each payload and hands it to the [`EventSink`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::aggregator::{Event, EventSink};
use crate::link::error::{LinkError, LinkResult};
use crate::link::transport::{
    DeviceIdentity, DisconnectSignal, GattSession, LinkProfile, NotificationChannel, Transport,
};
use crate::protocol;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// Connection state of the link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LinkState {
    /// No device attached.
    #[default]
    Disconnected,
    /// Connect sequence running.
    Connecting,
    /// Subscribed and forwarding notifications.
    Connected,
    /// The connect sequence failed; the manager moves on to `Disconnected`.
    Failed(String),
}

impl LinkState {
    /// Whether a live device is attached.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Short lowercase name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed(_) => "failed",
        }
    }
}

/// Everything observers need to know about the link at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LinkStatus {
    /// Current state.
    pub state: LinkState,

    /// The attached device while connected.
    pub device: Option<DeviceIdentity>,

    /// Reason of the most recent failure, cleared by the next successful connect.
    pub last_error: Option<String>,
}

/// Notification-worthy link transitions.
///
/// The presentation layer decides whether and how to surface these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    /// A connect sequence started.
    Connecting,
    /// The device is attached and notifications are flowing.
    Connected {
        /// The attached device.
        device: DeviceIdentity,
    },
    /// The connect sequence failed.
    ConnectFailed {
        /// Machine-readable error code.
        code: String,
        /// Human-readable reason.
        reason: String,
    },
    /// The link was closed from this side.
    Disconnected {
        /// The device that was attached, if the connect had completed.
        device: Option<DeviceIdentity>,
    },
    /// The device dropped the link on its own.
    RemoteDisconnected {
        /// The device that went away.
        device: DeviceIdentity,
    },
    /// A write to the device failed; the link stays up.
    WriteFailed {
        /// Human-readable reason.
        reason: String,
    },
}

type Reply<T> = oneshot::Sender<LinkResult<T>>;

enum Command {
    Connect { respond_to: Reply<DeviceIdentity> },
    Disconnect { respond_to: Reply<()> },
    Send { payload: Vec<u8>, respond_to: Reply<()> },
}

enum Internal {
    ConnectFinished {
        attempt: u64,
        result: LinkResult<Established>,
    },
    RemoteDisconnected {
        generation: u64,
    },
}

struct Established {
    device: DeviceIdentity,
    session: Arc<dyn GattSession>,
    channel: NotificationChannel,
    disconnected: DisconnectSignal,
}

/// The attached device and the resources tied to it.
struct RemoteDevice {
    identity: DeviceIdentity,
    session: Arc<dyn GattSession>,
    pump: JoinHandle<()>,
    generation: u64,
}

impl RemoteDevice {
    async fn release(self) {
        self.pump.abort();
        if let Err(err) = self.session.close().await {
            warn!(device = %self.identity.id, error = %err, "Failed to close session cleanly");
        }
    }
}

struct PendingConnect {
    attempt: u64,
    cancel: Option<oneshot::Sender<()>>,
    respond_to: Reply<DeviceIdentity>,
    disconnect_waiters: Vec<Reply<()>>,
}

enum Phase {
    Idle,
    Connecting(PendingConnect),
    Connected(RemoteDevice),
}

/// Handle to the link actor.
#[derive(Clone)]
pub struct LinkManager {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<LinkStatus>,
    events: broadcast::Sender<LinkEvent>,
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl LinkManager {
    /// Start the actor on the current Tokio runtime.
    ///
    /// Decoded notification payloads are delivered to `sink`. The actor stops
    /// (closing any open session) once every handle has been dropped.
    #[must_use]
    pub fn spawn(
        transport: Arc<dyn Transport>,
        profile: LinkProfile,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (actor, handle) = Self::build(transport, profile, sink);
        tokio::spawn(actor.run());
        handle
    }

    fn build(
        transport: Arc<dyn Transport>,
        profile: LinkProfile,
        sink: Arc<dyn EventSink>,
    ) -> (LinkActor, Self) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let actor = LinkActor {
            transport,
            profile,
            sink,
            commands: commands_rx,
            internal_tx,
            internal_rx,
            status: status_tx,
            events: events_tx.clone(),
            phase: Phase::Idle,
            attempts: 0,
            generation: 0,
        };
        let handle = Self {
            commands: commands_tx,
            status: status_rx,
            events: events_tx,
        };
        (actor, handle)
    }

    /// Discover, connect and subscribe to the sensor bridge.
    ///
    /// # Errors
    ///
    /// `ConnectInProgress` / `AlreadyConnected` if the link is not
    /// disconnected (state is left untouched), `Cancelled` if `disconnect()`
    /// aborted the attempt, or the transport error of the failing step.
    pub async fn connect(&self) -> LinkResult<DeviceIdentity> {
        self.request(|respond_to| Command::Connect { respond_to })
            .await
    }

    /// Drop the link, or abort a running connect sequence.
    ///
    /// A no-op when already disconnected.
    ///
    /// # Errors
    ///
    /// Only `ManagerClosed`.
    pub async fn disconnect(&self) -> LinkResult<()> {
        self.request(|respond_to| Command::Disconnect { respond_to })
            .await
    }

    /// Write a UTF-8 command string to the device.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a live link, `WriteFailed` if the transport
    /// rejected the write (the link stays up).
    pub async fn send_data(&self, text: &str) -> LinkResult<()> {
        let payload = text.as_bytes().to_vec();
        self.request(|respond_to| Command::Send {
            payload,
            respond_to,
        })
        .await
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.status.borrow().state.clone()
    }

    /// Current state together with the attached device.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every published status.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Subscribe to link transition events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> LinkResult<T> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(command(respond_to))
            .await
            .map_err(|_| LinkError::ManagerClosed)?;
        response.await.map_err(|_| LinkError::ManagerClosed)?
    }
}

struct LinkActor {
    transport: Arc<dyn Transport>,
    profile: LinkProfile,
    sink: Arc<dyn EventSink>,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    status: watch::Sender<LinkStatus>,
    events: broadcast::Sender<LinkEvent>,
    phase: Phase,
    attempts: u64,
    generation: u64,
}

impl LinkActor {
    async fn run(mut self) {
        debug!("Link manager started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal).await,
            }
        }
        self.shutdown().await;
        debug!("Link manager stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { respond_to } => match &self.phase {
                Phase::Idle => self.start_connect(respond_to),
                Phase::Connecting(_) => {
                    debug!("Rejecting connect: attempt already in progress");
                    let _ = respond_to.send(Err(LinkError::ConnectInProgress));
                }
                Phase::Connected(_) => {
                    debug!("Rejecting connect: already connected");
                    let _ = respond_to.send(Err(LinkError::AlreadyConnected));
                }
            },
            Command::Disconnect { respond_to } => self.disconnect(respond_to).await,
            Command::Send {
                payload,
                respond_to,
            } => {
                let result = self.write(&payload).await;
                let _ = respond_to.send(result);
            }
        }
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::ConnectFinished { attempt, result } => {
                self.finish_connect(attempt, result).await;
            }
            Internal::RemoteDisconnected { generation } => {
                self.remote_disconnected(generation).await;
            }
        }
    }

    fn start_connect(&mut self, respond_to: Reply<DeviceIdentity>) {
        self.attempts += 1;
        let attempt = self.attempts;
        let (cancel_tx, cancel_rx) = oneshot::channel();

        self.phase = Phase::Connecting(PendingConnect {
            attempt,
            cancel: Some(cancel_tx),
            respond_to,
            disconnect_waiters: Vec::new(),
        });
        self.publish(LinkState::Connecting, None);
        self.emit(LinkEvent::Connecting);

        let transport = self.transport.clone();
        let profile = self.profile.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = establish(transport.as_ref(), &profile, cancel_rx).await;
            if let Err(mpsc::error::SendError(Internal::ConnectFinished {
                result: Ok(orphan),
                ..
            })) = internal.send(Internal::ConnectFinished { attempt, result })
            {
                // The actor is gone; nobody else will release this session.
                close_quietly(orphan.session.as_ref()).await;
            }
        });
    }

    async fn finish_connect(&mut self, attempt: u64, result: LinkResult<Established>) {
        let pending = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting(pending) if pending.attempt == attempt => pending,
            other => {
                self.phase = other;
                warn!(attempt, "Ignoring result of a stale connect attempt");
                if let Ok(established) = result {
                    close_quietly(established.session.as_ref()).await;
                }
                return;
            }
        };

        let cancelled = pending.cancel.is_none();
        match result {
            Ok(established) if cancelled => {
                close_quietly(established.session.as_ref()).await;
                self.finish_cancelled(pending);
            }
            Ok(established) => self.activate(established, pending),
            Err(_) if cancelled => self.finish_cancelled(pending),
            Err(err) => self.fail(err, pending),
        }
    }

    fn activate(&mut self, established: Established, pending: PendingConnect) {
        self.generation += 1;
        let generation = self.generation;
        let identity = established.device.clone();

        // Publish before the pump starts so the synthetic source has already
        // stepped aside when the first real payload arrives.
        self.status.send_replace(LinkStatus {
            state: LinkState::Connected,
            device: Some(identity.clone()),
            last_error: None,
        });
        info!(device = %identity.id, name = identity.display_name(), "Link connected");
        self.emit(LinkEvent::Connected {
            device: identity.clone(),
        });

        let pump = tokio::spawn(pump(
            generation,
            established.channel,
            established.disconnected,
            self.sink.clone(),
            self.internal_tx.clone(),
        ));
        self.phase = Phase::Connected(RemoteDevice {
            identity: identity.clone(),
            session: established.session,
            pump,
            generation,
        });

        let _ = pending.respond_to.send(Ok(identity));
        for waiter in pending.disconnect_waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    fn finish_cancelled(&mut self, pending: PendingConnect) {
        info!("Connect attempt cancelled");
        self.publish(LinkState::Disconnected, None);
        self.emit(LinkEvent::Disconnected { device: None });
        let _ = pending.respond_to.send(Err(LinkError::Cancelled));
        for waiter in pending.disconnect_waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    fn fail(&mut self, err: LinkError, pending: PendingConnect) {
        let reason = err.to_string();
        warn!(error_code = err.error_code(), %reason, "Connect attempt failed");

        self.status.send_replace(LinkStatus {
            state: LinkState::Failed(reason.clone()),
            device: None,
            last_error: Some(reason.clone()),
        });
        self.emit(LinkEvent::ConnectFailed {
            code: err.error_code().to_string(),
            reason: reason.clone(),
        });
        self.status.send_replace(LinkStatus {
            state: LinkState::Disconnected,
            device: None,
            last_error: Some(reason),
        });

        let _ = pending.respond_to.send(Err(err));
        for waiter in pending.disconnect_waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    async fn disconnect(&mut self, respond_to: Reply<()>) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {
                debug!("Disconnect requested while already disconnected");
                let _ = respond_to.send(Ok(()));
            }
            Phase::Connecting(mut pending) => {
                if let Some(cancel) = pending.cancel.take() {
                    info!("Aborting connect attempt");
                    let _ = cancel.send(());
                }
                // Answered once the connect task has released what it holds.
                pending.disconnect_waiters.push(respond_to);
                self.phase = Phase::Connecting(pending);
            }
            Phase::Connected(remote) => {
                let identity = remote.identity.clone();
                info!(device = %identity.id, "Disconnecting");
                remote.release().await;
                self.publish(LinkState::Disconnected, None);
                self.emit(LinkEvent::Disconnected {
                    device: Some(identity),
                });
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    async fn remote_disconnected(&mut self, generation: u64) {
        let remote = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connected(remote) if remote.generation == generation => remote,
            other => {
                self.phase = other;
                debug!(generation, "Ignoring disconnect signal from a previous link");
                return;
            }
        };

        let identity = remote.identity.clone();
        warn!(device = %identity.id, "Device disconnected unexpectedly");
        remote.release().await;
        self.publish(LinkState::Disconnected, None);
        self.emit(LinkEvent::RemoteDisconnected { device: identity });
    }

    async fn write(&mut self, payload: &[u8]) -> LinkResult<()> {
        let Phase::Connected(remote) = &self.phase else {
            debug!("Write requested without a connected device");
            return Err(LinkError::NotConnected);
        };

        match remote.session.write(payload).await {
            Ok(()) => {
                debug!(bytes = payload.len(), "Data sent");
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    LinkError::WriteFailed(_) => err,
                    other => LinkError::WriteFailed(other.to_string()),
                };
                warn!(error = %err, "Write failed");
                self.emit(LinkEvent::WriteFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn shutdown(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::Connecting(pending) => {
                // The connect task notices the dropped receiver and closes its
                // own session.
                drop(pending);
            }
            Phase::Connected(remote) => remote.release().await,
        }
        self.publish(LinkState::Disconnected, None);
    }

    fn publish(&self, state: LinkState, device: Option<DeviceIdentity>) {
        self.status.send_modify(|status| {
            if status.state != state {
                debug!(from = status.state.as_str(), to = state.as_str(), "Link state changed");
            }
            status.state = state;
            status.device = device;
        });
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn establish(
    transport: &dyn Transport,
    profile: &LinkProfile,
    mut cancel: oneshot::Receiver<()>,
) -> LinkResult<Established> {
    let filter = profile.discovery_filter();
    let device = tokio::select! {
        result = transport.discover(&filter) => result?,
        _ = &mut cancel => return Err(LinkError::Cancelled),
    };
    info!(device = %device.id, name = device.display_name(), "Device selected, connecting");

    // Session setup is not interrupted midway; a cancel that arrives meanwhile
    // is honoured right after, once there is a session to close.
    let session: Arc<dyn GattSession> = Arc::from(transport.open_session(&device).await?);
    if cancel_requested(&mut cancel) {
        close_quietly(session.as_ref()).await;
        return Err(LinkError::Cancelled);
    }

    let bound = tokio::select! {
        result = bind(session.as_ref(), profile) => result,
        _ = &mut cancel => Err(LinkError::Cancelled),
    };
    match bound {
        Ok(channel) => Ok(Established {
            disconnected: session.disconnected(),
            device,
            session,
            channel,
        }),
        Err(err) => {
            close_quietly(session.as_ref()).await;
            Err(err)
        }
    }
}

async fn bind(session: &dyn GattSession, profile: &LinkProfile) -> LinkResult<NotificationChannel> {
    session
        .resolve(profile.service, profile.characteristic)
        .await?;
    session.subscribe().await
}

fn cancel_requested(cancel: &mut oneshot::Receiver<()>) -> bool {
    !matches!(
        cancel.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}

async fn close_quietly(session: &dyn GattSession) {
    if let Err(err) = session.close().await {
        warn!(error = %err, "Failed to release session");
    }
}

async fn pump(
    generation: u64,
    mut channel: NotificationChannel,
    mut disconnected: DisconnectSignal,
    sink: Arc<dyn EventSink>,
    internal: mpsc::UnboundedSender<Internal>,
) {
    loop {
        tokio::select! {
            biased;
            payload = channel.next() => match payload {
                Some(payload) => deliver(sink.as_ref(), &payload),
                None => {
                    debug!(generation, "Notification stream closed");
                    break;
                }
            },
            () = &mut disconnected => {
                debug!(generation, "Transport reported disconnect");
                break;
            }
        }
    }
    let _ = internal.send(Internal::RemoteDisconnected { generation });
}

fn deliver(sink: &dyn EventSink, payload: &[u8]) {
    match protocol::decode_payload(payload) {
        Some(direction) => sink.ingest(Event::now(direction)),
        None => sink.unrecognized(),
    }
}
