use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::{clock::now_ms, error::AppError, state::AppState};

/// Header carrying the platform's encrypted app context.
pub const CONTEXT_HEADER: &str = "x-zoom-app-context";

/// Requires a valid, unexpired app context on the request.
///
/// The decoded [`AuthenticatedContext`](crate::models::context::AuthenticatedContext)
/// is inserted as a request extension.
pub async fn require_context(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(CONTEXT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            tracing::warn!("❌ No app context header found");
            AppError::Decode("missing context".into())
        })?;

    let context = state.decoder.decode(token)?;

    if !context.is_fresh_at(now_ms(), state.config.context_skew) {
        tracing::warn!("❌ Context expired for user: {}", context.user_id);
        return Err(AppError::Decode("context expired".into()));
    }

    if context.user_id.trim().is_empty() {
        return Err(AppError::Decode("context has no user".into()));
    }

    tracing::debug!("✅ Context accepted for user: {}", context.user_id);
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}
