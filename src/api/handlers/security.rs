use axum::{extract::State, Extension, Json};
use serde::Deserialize;

use crate::{error::AppResult, AppState};

use super::super::middleware::{get_user_id, Claims};
use super::devices::MessageResponse;

#[derive(Debug, Deserialize)]
pub struct EnableTwoFactorRequest {
    pub secret: String,
}

pub async fn enable_two_factor(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<EnableTwoFactorRequest>,
) -> AppResult<Json<MessageResponse>> {
    let user_id = get_user_id(&claims)?;
    state.two_factor.enable(user_id, body.secret).await?;

    Ok(Json(MessageResponse {
        message: "Two-factor enabled".to_string(),
    }))
}

pub async fn disable_two_factor(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<MessageResponse>> {
    let user_id = get_user_id(&claims)?;
    state.two_factor.disable(user_id).await?;

    Ok(Json(MessageResponse {
        message: "Two-factor disabled".to_string(),
    }))
}
