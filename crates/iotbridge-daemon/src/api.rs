//! REST API handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use iotbridge_core::{Capability, Device, DeviceId, DevicePatch};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::invoke::InvokeError;
use crate::state::{AppState, DeviceError};

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ApiError::new(msg))).into_response()
}

impl IntoResponse for DeviceError {
    fn into_response(self) -> Response {
        let status = match &self {
            DeviceError::NotFound(_) | DeviceError::NotDiscovered(_) => StatusCode::NOT_FOUND,
            DeviceError::Invalid(_) => StatusCode::BAD_REQUEST,
            DeviceError::UnknownProtocol(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DeviceError::Store(e) => {
                error!(error = %e, "Device store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}

impl IntoResponse for InvokeError {
    fn into_response(self) -> Response {
        let status = match &self {
            InvokeError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            InvokeError::UnsupportedCapability { .. } | InvokeError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            InvokeError::UnknownProtocol(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InvokeError::DriverCommunication(_) => StatusCode::BAD_GATEWAY,
            InvokeError::Persistence { .. } | InvokeError::Lookup(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            InvokeError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        };
        error_response(status, self.to_string())
    }
}

/// Parse an optional JSON object body; an empty body is an empty object
fn object_body(body: &Bytes) -> Result<Map<String, Value>, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Request body must be a JSON object: {}", e),
        )
    })
}

/// Liveness probe
pub async fn health() -> impl IntoResponse {
    "OK"
}

/// List all registered devices
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Device>>, DeviceError> {
    Ok(Json(state.devices().await?))
}

/// Register (or replace) a device
pub async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(device): Json<Device>,
) -> Result<impl IntoResponse, DeviceError> {
    let device = state.register_device(device).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

/// Get a specific device by ID, with the driver's live state
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Device>, DeviceError> {
    Ok(Json(state.device_with_live_state(&DeviceId::new(id)).await?))
}

/// Update a device's name or room
pub async fn patch_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<DevicePatch>,
) -> Result<Json<Device>, DeviceError> {
    Ok(Json(state.patch_device(&DeviceId::new(id), &patch).await?))
}

/// Remove a device
pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, DeviceError> {
    state.delete_device(&DeviceId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_capabilities(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Capability>>, DeviceError> {
    let device = state.device(&DeviceId::new(id)).await?;
    Ok(Json(device.capabilities))
}

/// Replace a device's capability list
pub async fn put_capabilities(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(capabilities): Json<Vec<Capability>>,
) -> Result<Json<Vec<Capability>>, DeviceError> {
    let device = state
        .replace_capabilities(&DeviceId::new(id), capabilities)
        .await?;
    Ok(Json(device.capabilities))
}

#[derive(Serialize)]
struct InvokeResponse {
    status: &'static str,
    capability: String,
    new_state: iotbridge_core::StateMap,
}

/// Invoke a capability on a device.
///
/// The invocation runs in its own task so a client hanging up cannot cut it
/// off between the driver call and the store write.
pub async fn invoke_capability(
    State(state): State<Arc<AppState>>,
    Path((id, capability)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let input = match object_body(&body) {
        Ok(input) => input,
        Err(response) => return response,
    };

    let id = DeviceId::new(id);
    info!(device = %id, capability = %capability, "Invocation requested");

    let task = {
        let state = state.clone();
        tokio::spawn(async move {
            state
                .coordinator
                .invoke_with_cancel(&id, &capability, &input, &state.shutdown)
                .await
        })
    };

    match task.await {
        Ok(Ok(invocation)) => Json(InvokeResponse {
            status: "success",
            capability: invocation.capability,
            new_state: invocation.new_state,
        })
        .into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!(error = %e, "Invocation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Invocation task failed")
        }
    }
}

/// Scan request body
#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    protocols: Vec<String>,
}

/// Start a (simulated) discovery scan
pub async fn start_scan(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    // unparseable bodies scan everything
    let request: ScanRequest = serde_json::from_slice(&body).unwrap_or_default();
    let protocols = state.scanner.start_scan(&request.protocols).await;
    Json(serde_json::json!({
        "status": "scanning",
        "protocols": protocols,
    }))
}

/// Results of the last scan
pub async fn scan_results(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scanner.results().await)
}

/// Register-from-scan request body
#[derive(Debug, Deserialize)]
pub struct ScanRegisterRequest {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    room: String,
}

/// Register a device from the last scan's results
pub async fn register_from_scan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRegisterRequest>,
) -> Result<impl IntoResponse, DeviceError> {
    let device = state
        .register_from_scan(&DeviceId::new(req.id), &req.name, &req.room)
        .await?;
    Ok((StatusCode::CREATED, Json(device)))
}
