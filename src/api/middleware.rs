use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    transport::ClientSession,
    AppState,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user_id
    pub iss: String, // issuer
    pub exp: i64,    // expiry
    pub iat: i64,    // issued at
}

/// Device tracking middleware. Tracking is best-effort: any failure is
/// logged and the request proceeds untracked — identity continuation never
/// gates availability.
pub async fn track_device(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.extensions().get::<ClientSession>().is_none() {
        request.extensions_mut().insert(ClientSession::default());
    }
    let session = request.extensions().get::<ClientSession>().cloned();

    let tracked = match state.tracker.track(&mut request).await {
        Ok(id) => id,
        Err(e) => {
            tracing::info!("Device tracking skipped: {}", e);
            None
        }
    };

    let mut response = next.run(request).await;

    if let Some(id) = tracked {
        if let Err(e) = state.tracker.attach(&mut response, id, session.as_ref()) {
            tracing::warn!("Could not attach device id to response: {}", e);
        }
    }

    response
}

/// Authentication middleware. Tokens are issued by the external auth
/// system; we only validate and read the user id out of the claims.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let mut validation = Validation::default();
    validation.set_issuer(&[&state.config.jwt.issuer]);
    let key = DecodingKey::from_secret(state.config.jwt.secret.as_bytes());

    let token_data = decode::<Claims>(token, &key, &validation)?;
    request.extensions_mut().insert(token_data.claims);

    Ok(next.run(request).await)
}

/// Extract user_id from request extensions
pub fn get_user_id(claims: &Claims) -> AppResult<Uuid> {
    Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)
}
