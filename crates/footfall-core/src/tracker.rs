//! Consumer-facing facade.
//!
//! A [`Tracker`] wires the link manager, the shared aggregator and the
//! synthetic source together. Presentation layers read [`TrackerSnapshot`]s,
//! issue link commands and subscribe to [`LinkEvent`]s; they never reach into
//! the components directly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::aggregator::{Counters, Event, SharedAggregator};
use crate::config::Config;
use crate::error::Result;
use crate::link::{DeviceIdentity, LinkEvent, LinkManager, LinkProfile, LinkState, Transport};
use crate::protocol::Direction;
use crate::synthetic::SyntheticEventSource;

/// Which source currently feeds the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// A connected bridge.
    Link,
    /// The synthetic generator.
    Synthetic,
    /// Nothing: no bridge and simulation disabled.
    Idle,
}

/// Read-only view of everything a dashboard shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TrackerSnapshot {
    /// Link state.
    pub link: LinkState,

    /// Attached device while connected.
    pub device: Option<DeviceIdentity>,

    /// Most recent connect failure.
    pub last_error: Option<String>,

    /// Running totals.
    pub counters: Counters,

    /// Direction of the latest crossing.
    pub last_direction: Option<Direction>,

    /// Latest crossings, most recent first.
    pub activity: Vec<Event>,

    /// Payloads (or synthetic draws) that did not produce a crossing.
    pub unrecognized_payloads: u64,

    /// Which source is feeding the counters.
    pub source: EventSource,
}

/// The running counter.
#[derive(Debug)]
pub struct Tracker {
    link: LinkManager,
    aggregator: Arc<SharedAggregator>,
    synthetic: Option<JoinHandle<()>>,
}

impl Tracker {
    /// Start a tracker from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn start(transport: Arc<dyn Transport>, config: &Config) -> Result<Self> {
        config.validate()?;
        let synthetic = config
            .simulation
            .enabled
            .then(|| SyntheticEventSource::new(config.simulation.period()));
        Ok(Self::with_parts(transport, config.link.profile(), synthetic))
    }

    /// Start a tracker from explicit parts.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn with_parts(
        transport: Arc<dyn Transport>,
        profile: LinkProfile,
        synthetic: Option<SyntheticEventSource>,
    ) -> Self {
        let aggregator = Arc::new(SharedAggregator::new());
        let link = LinkManager::spawn(transport, profile, aggregator.clone());
        let synthetic =
            synthetic.map(|source| source.spawn(link.watch_status(), aggregator.clone()));
        tracing::info!(simulation = synthetic.is_some(), "Tracker started");

        Self {
            link,
            aggregator,
            synthetic,
        }
    }

    /// Connect to the sensor bridge.
    ///
    /// # Errors
    ///
    /// See [`LinkManager::connect`].
    pub async fn connect(&self) -> Result<DeviceIdentity> {
        Ok(self.link.connect().await?)
    }

    /// Disconnect, or abort a running connect.
    ///
    /// # Errors
    ///
    /// See [`LinkManager::disconnect`].
    pub async fn disconnect(&self) -> Result<()> {
        Ok(self.link.disconnect().await?)
    }

    /// Send a command string to the bridge.
    ///
    /// # Errors
    ///
    /// See [`LinkManager::send_data`].
    pub async fn send_data(&self, text: &str) -> Result<()> {
        Ok(self.link.send_data(text).await?)
    }

    /// Subscribe to link transition events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.link.subscribe()
    }

    /// The underlying link manager.
    #[must_use]
    pub const fn link(&self) -> &LinkManager {
        &self.link
    }

    /// Recent crossings, most recent first.
    #[must_use]
    pub fn activity(&self) -> Vec<Event> {
        self.aggregator.lock().activity().to_vec()
    }

    /// Consistent view of link and counters.
    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        let status = self.link.status();
        let source = if status.state.is_connected() {
            EventSource::Link
        } else if self.synthetic.is_some() {
            EventSource::Synthetic
        } else {
            EventSource::Idle
        };

        let aggregator = self.aggregator.lock();
        TrackerSnapshot {
            link: status.state,
            device: status.device,
            last_error: status.last_error,
            counters: aggregator.counters(),
            last_direction: aggregator.last_direction(),
            activity: aggregator.activity().to_vec(),
            unrecognized_payloads: aggregator.unrecognized(),
            source,
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Some(task) = self.synthetic.take() {
            task.abort();
        }
    }
}
