//! Link control endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use footfall_core::{DeviceIdentity, FootfallError, LinkError, LinkState, LinkStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Successful connect response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device": { "id": "98:D3:31:F5:2A:10", "name": "HC-05" },
    "link": { "state": "connected" }
}))]
pub struct ConnectResponse {
    /// The attached device.
    pub device: DeviceIdentity,

    /// Link state after the connect.
    pub link: LinkState,
}

/// Disconnect response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DisconnectResponse {
    /// Link state after the disconnect.
    pub link: LinkState,
}

/// Request body for sending a command string to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "text": "reset" }))]
pub struct SendRequest {
    /// Text to write, sent as UTF-8 bytes.
    #[schema(example = "reset")]
    pub text: String,
}

/// Send response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendResponse {
    /// Number of bytes written to the characteristic.
    #[schema(example = 5)]
    pub bytes_sent: usize,
}

/// Attach the current link state to errors caused by it.
fn link_error(state: &SharedState, err: FootfallError) -> ApiError {
    let state_conflict = err.as_link_error().is_some_and(LinkError::is_state_error);
    let mut api_error = ApiError::from(err);
    if state_conflict {
        if let ApiError::Conflict { link_state, .. } = &mut api_error {
            *link_state = Some(state.tracker.link().state().as_str().to_string());
        }
    }
    api_error
}

/// Get the link status.
#[utoipa::path(
    get,
    path = "/api/link",
    tag = "link",
    operation_id = "getLinkStatus",
    summary = "Get link status",
    description = "Returns the connection state, the attached device and the \
        reason of the most recent connect failure.",
    responses(
        (status = 200, description = "Current link status", body = LinkStatus)
    )
)]
pub async fn get_link_status(State(state): State<SharedState>) -> Json<LinkStatus> {
    Json(state.tracker.link().status())
}

/// Connect to the sensor bridge.
#[utoipa::path(
    post,
    path = "/api/link/connect",
    tag = "link",
    operation_id = "connectLink",
    summary = "Connect to the sensor bridge",
    description = "Discovers the bridge, opens a GATT session, resolves the data \
        characteristic and subscribes to notifications. Completes once the link \
        is live or the attempt fails. While connected, the synthetic generator \
        is paused and counts come from the device.",
    responses(
        (status = 200, description = "Connected", body = ConnectResponse),
        (status = 409, description = "Already connected, connect in progress or cancelled", body = ErrorResponse),
        (status = 424, description = "Device lacks the expected service or characteristic", body = ErrorResponse),
        (status = 503, description = "Bluetooth unavailable or device unreachable", body = ErrorResponse)
    )
)]
pub async fn connect(State(state): State<SharedState>) -> ApiResult<Json<ConnectResponse>> {
    let device = state
        .tracker
        .connect()
        .await
        .map_err(|err| link_error(&state, err))?;

    Ok(Json(ConnectResponse {
        device,
        link: state.tracker.link().state(),
    }))
}

/// Disconnect from the bridge.
#[utoipa::path(
    post,
    path = "/api/link/disconnect",
    tag = "link",
    operation_id = "disconnectLink",
    summary = "Disconnect from the bridge",
    description = "Closes the link, or aborts a connect that is still running. \
        Succeeds when already disconnected.",
    responses(
        (status = 200, description = "Disconnected", body = DisconnectResponse),
        (status = 503, description = "Link manager unavailable", body = ErrorResponse)
    )
)]
pub async fn disconnect(State(state): State<SharedState>) -> ApiResult<Json<DisconnectResponse>> {
    state
        .tracker
        .disconnect()
        .await
        .map_err(|err| link_error(&state, err))?;

    Ok(Json(DisconnectResponse {
        link: state.tracker.link().state(),
    }))
}

/// Write a command string to the bridge.
#[utoipa::path(
    post,
    path = "/api/link/send",
    tag = "link",
    operation_id = "sendData",
    summary = "Send text to the bridge",
    description = "Writes the text verbatim as UTF-8. An empty string is written \
        as an empty buffer.",
    request_body = SendRequest,
    responses(
        (status = 200, description = "Written", body = SendResponse),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 409, description = "Not connected", body = ErrorResponse),
        (status = 502, description = "The device rejected the write", body = ErrorResponse)
    )
)]
pub async fn send_data(
    State(state): State<SharedState>,
    request: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<Json<SendResponse>> {
    let Json(request) = request.map_err(|rejection| ApiError::BadRequest {
        error_code: "invalid_request".to_string(),
        message: rejection.body_text(),
    })?;

    state
        .tracker
        .send_data(&request.text)
        .await
        .map_err(|err| link_error(&state, err))?;

    Ok(Json(SendResponse {
        bytes_sent: request.text.len(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use footfall_core::MockFailure;

    use crate::api::test_support::{get_json, post_json, test_state};

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let (state, transport) = test_state();

        let (status, body) = post_json(state.clone(), "/api/link/connect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["link"]["state"], "connected");
        assert!(body["device"]["id"].is_string());

        let (_, body) = get_json(state.clone(), "/api/link").await;
        assert_eq!(body["state"]["state"], "connected");

        let (status, body) = post_json(state.clone(), "/api/link/disconnect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["link"]["state"], "disconnected");
        assert_eq!(transport.open_sessions(), 0);

        let (status, _) = post_json(state, "/api/link/disconnect", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_connect_twice_conflicts() {
        let (state, _transport) = test_state();
        post_json(state.clone(), "/api/link/connect", None).await;

        let (status, body) = post_json(state, "/api/link/connect", None).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_connected");
        assert_eq!(body["details"]["link_state"], "connected");
    }

    #[tokio::test]
    async fn test_connect_failures_map_to_status_codes() {
        let cases = [
            (MockFailure::Discovery, StatusCode::SERVICE_UNAVAILABLE),
            (MockFailure::Session, StatusCode::SERVICE_UNAVAILABLE),
            (MockFailure::Service, StatusCode::FAILED_DEPENDENCY),
            (MockFailure::Characteristic, StatusCode::FAILED_DEPENDENCY),
        ];

        for (failure, expected) in cases {
            let (state, transport) = test_state();
            transport.fail_at(Some(failure));

            let (status, _) = post_json(state.clone(), "/api/link/connect", None).await;
            assert_eq!(status, expected, "{failure:?}");

            let (_, body) = get_json(state, "/api/link").await;
            assert_eq!(body["state"]["state"], "disconnected");
            assert!(body["last_error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (state, _transport) = test_state();

        let (status, body) = post_json(
            state,
            "/api/link/send",
            Some(serde_json::json!({ "text": "ping" })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "not_connected");
        assert_eq!(body["details"]["link_state"], "disconnected");
    }

    #[tokio::test]
    async fn test_send_writes_utf8() {
        let (state, transport) = test_state();
        post_json(state.clone(), "/api/link/connect", None).await;

        let (status, body) = post_json(
            state,
            "/api/link/send",
            Some(serde_json::json!({ "text": "héllo" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bytes_sent"], "héllo".len());
        let remote = transport.device().unwrap();
        assert_eq!(remote.written(), vec!["héllo".as_bytes().to_vec()]);
    }

    #[tokio::test]
    async fn test_send_writes_empty_text_as_empty_buffer() {
        let (state, transport) = test_state();
        post_json(state.clone(), "/api/link/connect", None).await;

        let (status, body) =
            post_json(state, "/api/link/send", Some(serde_json::json!({ "text": "" }))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bytes_sent"], 0);
        let remote = transport.device().unwrap();
        assert_eq!(remote.written(), vec![Vec::<u8>::new()]);
    }

    #[tokio::test]
    async fn test_send_rejects_malformed_body() {
        let (state, _transport) = test_state();

        let (status, body) = post_json(
            state,
            "/api/link/send",
            Some(serde_json::json!({ "message": "ping" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
    }
}
