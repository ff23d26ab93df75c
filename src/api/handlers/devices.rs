use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Extension, Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Device, StatusCount},
    transport::DeviceId,
    AppState,
};

use super::super::middleware::{get_user_id, Claims};

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Fetch a device scoped to the requesting user: it must be linked to them.
async fn owned_device(state: &AppState, user_id: Uuid, uuid: Uuid) -> AppResult<Device> {
    let device = state.devices.by_uuid_or_fail(DeviceId::from(uuid)).await?;
    if state.devices.pivot(&device, user_id).await?.is_none() {
        return Err(AppError::DeviceNotFound);
    }
    Ok(device)
}

pub async fn get_devices(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<Device>>> {
    let user_id = get_user_id(&claims)?;
    let devices = state.devices.user_devices(user_id).await?;
    Ok(Json(devices))
}

pub async fn get_current_device(
    State(state): State<AppState>,
    device_id: Option<Extension<DeviceId>>,
) -> AppResult<Json<Device>> {
    let Extension(device_id) = device_id.ok_or(AppError::DeviceNotFound)?;
    let device = state.devices.by_uuid_or_fail(device_id).await?;
    Ok(Json(device))
}

pub async fn get_device(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<Device>> {
    let user_id = get_user_id(&claims)?;
    let device = owned_device(&state, user_id, uuid).await?;
    Ok(Json(device))
}

pub async fn verify_device(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<Device>> {
    let user_id = get_user_id(&claims)?;
    let device = owned_device(&state, user_id, uuid).await?;
    let device = state.devices.verify(&device, user_id).await?;
    Ok(Json(device))
}

pub async fn hijack_device(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<Device>> {
    let user_id = get_user_id(&claims)?;
    let device = owned_device(&state, user_id, uuid).await?;
    let device = state.devices.hijack(&device, user_id).await?;
    Ok(Json(device))
}

pub async fn remove_device(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let user_id = get_user_id(&claims)?;
    let device = owned_device(&state, user_id, uuid).await?;
    state.devices.forget(&device).await?;

    Ok(Json(MessageResponse {
        message: "Device removed".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct FingerprintRequest {
    pub fingerprint: String,
}

/// Record the client-computed fingerprint for the current device and
/// mirror it into its cookie when not already set.
pub async fn fingerprint_device(
    State(state): State<AppState>,
    device_id: Option<Extension<DeviceId>>,
    jar: CookieJar,
    Json(body): Json<FingerprintRequest>,
) -> AppResult<Response> {
    let Extension(device_id) = device_id.ok_or(AppError::DeviceNotFound)?;
    let device = state.devices.by_uuid_or_fail(device_id).await?;
    let saved = state.devices.fingerprint(&device, &body.fingerprint).await?;

    let mut response = Json(saved).into_response();
    let devices_cfg = &state.config.devices;
    if devices_cfg.fingerprinting_enabled
        && jar.get(&devices_cfg.fingerprint_cookie_name).is_none()
    {
        state
            .transport
            .attach_fingerprint_cookie(&mut response, &body.fingerprint)?;
    }
    Ok(response)
}

pub async fn status_summary(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<StatusCount>>> {
    let counts = state.devices.by_status().await?;
    Ok(Json(counts))
}
