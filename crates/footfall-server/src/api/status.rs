//! Counter status endpoints.

use axum::extract::State;
use axum::Json;
use footfall_core::aggregator::ACTIVITY_LOG_CAPACITY;
use footfall_core::{Event, TrackerSnapshot};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Recent activity response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "events": [
        { "timestamp": "2025-01-15T03:30:00Z", "direction": "out" },
        { "timestamp": "2025-01-15T03:29:57Z", "direction": "in" }
    ],
    "capacity": 5
}))]
pub struct ActivityResponse {
    /// Latest crossings, most recent first.
    pub events: Vec<Event>,

    /// Maximum number of events kept.
    #[schema(example = 5)]
    pub capacity: usize,
}

/// Get the full counter snapshot.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "counter",
    operation_id = "getStatus",
    summary = "Get counts and link state",
    description = "Returns the running entry/exit totals, the number of people \
        currently inside, the most recent crossings, the link state and which \
        source (live device or synthetic generator) is feeding the counts.",
    responses(
        (status = 200, description = "Current snapshot", body = TrackerSnapshot)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<TrackerSnapshot> {
    Json(state.tracker.snapshot())
}

/// Get the recent activity log.
#[utoipa::path(
    get,
    path = "/api/activity",
    tag = "counter",
    operation_id = "getActivity",
    summary = "Get recent crossings",
    responses(
        (status = 200, description = "Recent crossings, most recent first", body = ActivityResponse)
    )
)]
pub async fn get_activity(State(state): State<SharedState>) -> Json<ActivityResponse> {
    Json(ActivityResponse {
        events: state.tracker.activity(),
        capacity: ACTIVITY_LOG_CAPACITY,
    })
}
