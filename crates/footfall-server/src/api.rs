//! HTTP API routes and handlers.
//!
//! - `health` - Service health check
//! - `status` - Counter snapshot and recent activity
//! - `link` - Link status and control
//! - `events` - Server-sent link events
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
pub mod events;
pub mod health;
pub mod link;
pub mod openapi;
pub mod status;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /status            - Counts, activity and link state
/// ├── /activity          - Recent crossings
/// ├── /link              - Link status
/// │   ├── /connect       - Connect to the bridge
/// │   ├── /disconnect    - Disconnect or abort a connect
/// │   └── /send          - Write text to the bridge
/// ├── /events            - Server-sent link events
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/status", get(status::get_status))
                .route("/activity", get(status::get_activity))
                .route("/link", get(link::get_link_status))
                .route("/link/connect", post(link::connect))
                .route("/link/disconnect", post(link::disconnect))
                .route("/link/send", post(link::send_data))
                .route("/events", get(events::stream_events))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::NotFound {
        error_code: "not_found".to_string(),
        message: "No such endpoint".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use footfall_core::{Config, MockTransport, Tracker};
    use tower::ServiceExt;

    use super::create_router;
    use crate::state::{AppState, SharedState};

    /// State backed by a mock bridge, with simulation off so counts are exact.
    pub fn test_state() -> (SharedState, MockTransport) {
        let transport = MockTransport::new();
        let mut config = Config::default();
        config.simulation.enabled = false;
        let tracker = Tracker::start(Arc::new(transport.clone()), &config).unwrap();
        (AppState::new(tracker, config).into_shared(), transport)
    }

    /// Let the notification pump drain.
    pub async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    async fn call(
        state: SharedState,
        request: Request<Body>,
    ) -> (StatusCode, serde_json::Value) {
        let response = create_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn get_json(state: SharedState, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        call(state, request).await
    }

    pub async fn post_json(
        state: SharedState,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        call(state, request).await
    }
}
