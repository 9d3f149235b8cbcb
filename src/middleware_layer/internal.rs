use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::{error::AppError, state::AppState};

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

fn presented_token(request: &Request<Body>) -> Option<&str> {
    let headers = request.headers();
    headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
        })
        .map(str::trim)
}

/// Guards the identity endpoints when an internal token is configured.
pub async fn require_internal_token(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.internal_api_token.as_ref() else {
        return Ok(next.run(request).await);
    };

    let valid = presented_token(&request)
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);

    if !valid {
        tracing::warn!("❌ Internal token mismatch on {}", request.uri().path());
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
