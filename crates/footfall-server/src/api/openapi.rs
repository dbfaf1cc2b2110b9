//! OpenAPI specification for the footfall API.
//!
//! Served at `/api/openapi.json` and written to the workspace root by the
//! `gen-openapi` binary for dashboard client generation.

use axum::Json;
use footfall_core::{
    Counters, DeviceIdentity, Direction, Event, EventSource, LinkEvent, LinkState, LinkStatus,
    TrackerSnapshot,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::link::{ConnectResponse, DisconnectResponse, SendRequest, SendResponse};
use super::status::ActivityResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for footfall.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "footfall API",
        version = "0.1.0",
        description = r#"
# footfall API

footfall counts people walking through a doorway. A sensor bridge (an HC-05
style BLE serial module) notifies one token per crossing: `in` or `out`.

## Overview

1. **Counter**: running entrances, exits, people currently inside and the five
   most recent crossings
2. **Link**: connect to or disconnect from the bridge and write command text to it
3. **Events**: a server-sent stream of link transitions

When no bridge is connected and simulation is enabled, a synthetic generator
feeds the counter so dashboards stay alive. It pauses while a bridge is connected.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local footfall server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "counter", description = "Entry/exit counts and recent activity"),
        (name = "link", description = "BLE link control and transition events")
    ),
    paths(
        super::health::health_check,
        super::status::get_status,
        super::status::get_activity,
        super::link::get_link_status,
        super::link::connect,
        super::link::disconnect,
        super::link::send_data,
        super::events::stream_events,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            TrackerSnapshot,
            ActivityResponse,
            Counters,
            Event,
            Direction,
            EventSource,
            LinkState,
            LinkStatus,
            LinkEvent,
            DeviceIdentity,
            ConnectResponse,
            DisconnectResponse,
            SendRequest,
            SendResponse,
        )
    )
)]
pub struct ApiDoc;
