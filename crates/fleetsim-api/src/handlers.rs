//! HTTP request handlers

use crate::error::{ApiError, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use fleetsim_core::DeviceModel;
use fleetsim_device::{BindingConfig, BindingStatus, DeviceMetricsSnapshot, DeviceSnapshot};
use fleetsim_manager::{
    CreateDeviceRequest, CreateGroupRequest, DeviceFilter, DeviceManager, DropoutAccepted,
    DropoutConfig, EngineStats, GroupCreated, GroupStopped, LaunchAccepted, LaunchConfig,
};
use serde::Serialize;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: DeviceManager,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check handler
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// ----- models ---------------------------------------------------------

pub async fn list_models(State(state): State<AppState>) -> Json<Vec<DeviceModel>> {
    let models = state
        .manager
        .list_models()
        .iter()
        .map(|m| (**m).clone())
        .collect();
    Json(models)
}

pub async fn register_model(
    State(state): State<AppState>,
    Json(model): Json<DeviceModel>,
) -> Result<(StatusCode, Json<DeviceModel>)> {
    let stored = state.manager.register_model(model)?;
    Ok((StatusCode::CREATED, Json((*stored).clone())))
}

pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceModel>> {
    let model = state.manager.get_model(&id)?;
    Ok(Json((*model).clone()))
}

pub async fn delete_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.manager.delete_model(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ----- devices --------------------------------------------------------

/// Device listing response
#[derive(Serialize)]
pub struct DeviceListResponse {
    pub items: Vec<DeviceSnapshot>,
    pub total: usize,
}

pub async fn list_devices(
    State(state): State<AppState>,
    Query(filter): Query<DeviceFilter>,
) -> Json<DeviceListResponse> {
    let (items, total) = state.manager.list_devices(&filter);
    Json(DeviceListResponse { items, total })
}

pub async fn create_device(
    State(state): State<AppState>,
    Json(request): Json<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceSnapshot>)> {
    let snapshot = state.manager.create_device(request)?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceSnapshot>> {
    Ok(Json(state.manager.get_device_snapshot(&id)?))
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.manager.delete_device(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceSnapshot>> {
    Ok(Json(state.manager.start_device(&id).await?))
}

pub async fn stop_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceSnapshot>> {
    Ok(Json(state.manager.stop_device(&id).await?))
}

pub async fn device_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceMetricsSnapshot>> {
    Ok(Json(state.manager.get_device_metrics(&id)?))
}

// ----- groups ---------------------------------------------------------

pub async fn create_group(
    State(state): State<AppState>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupCreated>)> {
    let created = state.manager.create_group(request)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn start_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<LaunchAccepted>> {
    // The launch config body is optional; an empty body means immediate
    let config: LaunchConfig = if body.trim().is_empty() {
        LaunchConfig::default()
    } else {
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    Ok(Json(state.manager.start_group(&id, config)?))
}

pub async fn stop_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GroupStopped>> {
    Ok(Json(state.manager.stop_group(&id).await?))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.manager.delete_group(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn dropout_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<DropoutConfig>,
) -> Result<Json<DropoutAccepted>> {
    Ok(Json(state.manager.dropout_group(&id, config)?))
}

// ----- proxy bindings -------------------------------------------------

/// Bind response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindResponse {
    pub status: String,
    pub binding: BindingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

pub async fn bind_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<BindingConfig>,
) -> Result<Json<BindResponse>> {
    let (binding, webhook_url) = state.manager.bind_device(&id, config).await?;
    Ok(Json(BindResponse {
        status: "bound".to_string(),
        binding,
        webhook_url,
    }))
}

/// Unbind response
#[derive(Serialize)]
pub struct UnbindResponse {
    pub status: String,
}

pub async fn unbind_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UnbindResponse>> {
    state.manager.unbind_device(&id).await?;
    Ok(Json(UnbindResponse {
        status: "unbound".to_string(),
    }))
}

pub async fn get_binding(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BindingStatus>> {
    Ok(Json(state.manager.get_binding(&id)?))
}

// ----- webhooks -------------------------------------------------------

/// Webhook acceptance response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub status: String,
    pub device_id: String,
}

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<WebhookResponse>)> {
    if !payload.is_object() {
        return Err(ApiError::BadRequest(
            "webhook payload must be a JSON object".to_string(),
        ));
    }
    state.manager.ingest_webhook(&id, payload)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            status: "accepted".to_string(),
            device_id: id,
        }),
    ))
}

// ----- stats ----------------------------------------------------------

pub async fn stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.manager.stats())
}
