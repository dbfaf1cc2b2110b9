//! # footfall-core
//!
//! Core logic for the footfall doorway counter.
//!
//! A sensor bridge (an HC-05 style BLE serial module) reports one token per
//! doorway crossing. This crate provides:
//! - The BLE link lifecycle: discovery, connect, subscribe, remote disconnect
//! - Payload decoding and running entry/exit counts with a recent-activity log
//! - A synthetic event source for running without hardware
//! - Configuration loading and validation
//!
//! ## Architecture
//!
//! - [`protocol`] - GATT identifiers and the payload decoder
//! - [`aggregator`] - counters, activity log and the shared event sink
//! - [`link`] - connection state machine and transports
//! - [`synthetic`] - demo event generator, gated on link state
//! - [`tracker`] - the facade presentation layers talk to
//! - [`config`] - layered configuration
//! - [`error`] - unified error type

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod aggregator;
pub mod config;
pub mod error;
pub mod link;
pub mod protocol;
pub mod synthetic;
pub mod tracker;

// Re-export primary types for convenience
pub use aggregator::{ActivityLog, Counters, Event, EventAggregator, EventSink, SharedAggregator};
pub use config::{
    Config, ConfigError, ConfigResult, LinkConfig, LoggingConfig, ServerConfig, SimulationConfig,
};
pub use error::{FootfallError, Result};
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use link::mock::{MockDevice, MockFailure, MockTransport};
pub use link::{
    open_transport, DeviceIdentity, LinkError, LinkEvent, LinkManager, LinkResult, LinkState,
    LinkStatus, Transport,
};
pub use protocol::{decode_payload, Direction};
pub use synthetic::SyntheticEventSource;
pub use tracker::{EventSource, Tracker, TrackerSnapshot};
