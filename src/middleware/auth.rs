use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::errors::{AppError, Result};
use crate::models::user::{Claims, TokenKind};
use crate::state::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    let token = request
        .headers()
        .get("authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let decoding_key = DecodingKey::from_secret(state.config.jwt_secret.as_ref());

    let token_data = decode::<Claims>(token, &decoding_key, &Validation::new(Algorithm::HS256))
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    // Refresh tokens are only good for the refresh endpoint
    if token_data.claims.token_type != TokenKind::Access {
        return Err(StatusCode::UNAUTHORIZED);
    }

    request.extensions_mut().insert(token_data.claims);

    Ok(next.run(request).await)
}

pub fn require_admin(claims: &Claims) -> Result<()> {
    if claims.role.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden("Admin access required."))
    }
}

pub fn require_driver(claims: &Claims) -> Result<()> {
    if claims.role.is_driver() {
        Ok(())
    } else {
        Err(AppError::forbidden("Only drivers can perform this action."))
    }
}
