use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Session,
    services::tracker::client_ip,
    transport::DeviceId,
    AppState,
};

use super::super::middleware::{get_user_id, Claims};
use super::devices::MessageResponse;

pub async fn get_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<Session>>> {
    let user_id = get_user_id(&claims)?;
    let sessions = state.sessions.for_user(user_id).await?;
    Ok(Json(sessions))
}

pub async fn get_current_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    device_id: Option<Extension<DeviceId>>,
) -> AppResult<Json<Session>> {
    let user_id = get_user_id(&claims)?;
    let Extension(device_id) = device_id.ok_or(AppError::SessionNotFound)?;
    let session = state
        .sessions
        .current(device_id, Some(user_id))
        .await?
        .ok_or(AppError::SessionNotFound)?;
    Ok(Json(session))
}

/// Login hook: the external auth system calls this once a user is
/// authenticated on this device. Links the user to the device and starts a
/// fresh session (locked while 2FA is pending).
pub async fn refresh_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    device_id: Option<Extension<DeviceId>>,
    headers: HeaderMap,
) -> AppResult<Json<Session>> {
    let user_id = get_user_id(&claims)?;
    let Extension(device_id) = device_id.ok_or(AppError::DeviceNotFound)?;
    let device = state.devices.by_uuid_or_fail(device_id).await?;

    state.devices.attach_user(&device, user_id).await?;
    let session = state
        .sessions
        .refresh(user_id, &device, &client_ip(&headers))
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize, Default)]
pub struct EndQuery {
    #[serde(default)]
    pub forget: bool,
}

/// Logout hook for the current device+user session.
pub async fn end_current_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    device_id: Option<Extension<DeviceId>>,
    Query(query): Query<EndQuery>,
) -> AppResult<Json<MessageResponse>> {
    let user_id = get_user_id(&claims)?;
    let Extension(device_id) = device_id.ok_or(AppError::SessionNotFound)?;
    let session = state
        .sessions
        .current(device_id, Some(user_id))
        .await?
        .ok_or(AppError::SessionNotFound)?;
    state.sessions.end(&session, query.forget).await?;

    Ok(Json(MessageResponse {
        message: "Session ended".to_string(),
    }))
}

pub async fn end_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uuid): Path<Uuid>,
    Query(query): Query<EndQuery>,
) -> AppResult<Json<MessageResponse>> {
    let user_id = get_user_id(&claims)?;
    let session = state.sessions.by_uuid_or_fail(uuid).await?;
    if session.user_id != Some(user_id) {
        return Err(AppError::Unauthorized);
    }
    state.sessions.end(&session, query.forget).await?;

    Ok(Json(MessageResponse {
        message: "Session ended".to_string(),
    }))
}

pub async fn block_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<Session>> {
    let user_id = get_user_id(&claims)?;
    let session = state.sessions.by_uuid_or_fail(uuid).await?;

    // Only someone sharing the device may block one of its sessions.
    let device = state
        .devices
        .by_uuid_or_fail(session.device_uuid)
        .await?;
    if state.devices.pivot(&device, user_id).await?.is_none() {
        return Err(AppError::Unauthorized);
    }

    let blocked = state.sessions.block(&session, user_id).await?;
    Ok(Json(blocked))
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub code: i32,
}

/// Second-factor success path: the right login code verifies the device
/// for this user and unlocks the session.
pub async fn unlock_current_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    device_id: Option<Extension<DeviceId>>,
    Json(body): Json<UnlockRequest>,
) -> AppResult<Json<Session>> {
    let user_id = get_user_id(&claims)?;
    let Extension(device_id) = device_id.ok_or(AppError::SessionNotFound)?;
    let session = state
        .sessions
        .current(device_id, Some(user_id))
        .await?
        .ok_or(AppError::SessionNotFound)?;

    if session.login_code != Some(body.code) {
        return Err(AppError::BadRequest("Invalid login code".to_string()));
    }

    state.two_factor.confirm(user_id).await?;
    let device = state.devices.by_uuid_or_fail(device_id).await?;
    state.devices.verify(&device, user_id).await?;

    let unlocked = state.sessions.by_uuid_or_fail(session.uuid).await?;
    Ok(Json(unlocked))
}
