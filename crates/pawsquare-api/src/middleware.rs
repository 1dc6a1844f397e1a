use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::error;

use pawsquare_types::api::Claims;

use crate::auth::AppState;

/// Extract and validate the JWT from the Authorization header, then reject
/// actively banned users. Valid claims are stored in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let banned = state
        .db
        .is_banned(&token_data.claims.sub.to_string())
        .map_err(|e| {
            error!("ban lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    if banned {
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}
