//! Application state shared across handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use footfall_core::{Config, Tracker};

/// Shared handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Shared application state.
///
/// The tracker serializes link commands internally, so handlers need no lock.
#[derive(Debug)]
pub struct AppState {
    /// The running counter.
    pub tracker: Tracker,

    /// Configuration the server was started with.
    pub config: Config,

    /// When the server started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(tracker: Tracker, config: Config) -> Self {
        Self {
            tracker,
            config,
            started_at: Utc::now(),
        }
    }

    /// Wrap into the shared handle used by the router.
    #[must_use]
    pub fn into_shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Whole seconds since start.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        u64::try_from((Utc::now() - self.started_at).num_seconds()).unwrap_or(0)
    }
}
