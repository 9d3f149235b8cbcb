use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};

use crate::{
    error::{AppError, Result},
    models::config::{BuildConfig, ConfigRequest},
    models::context::AuthenticatedContext,
    state::{AppState, REQUEST_DEADLINE},
    tasks::with_deadline,
    validation::session::sanitize_filename,
};

/// Builds a signed editor config for the caller's file.
///
/// Inside a meeting the config joins (or starts) the meeting's session.
pub async fn build_config(
    State(state): State<AppState>,
    Extension(context): Extension<AuthenticatedContext>,
    headers: HeaderMap,
    Json(payload): Json<ConfigRequest>,
) -> Result<Response> {
    let file_name = sanitize_filename(&payload.file_name);
    if file_name.is_empty() {
        return Err(AppError::Validation("file_name is required".to_string()));
    }

    let file_url = payload.file_url.trim().to_string();
    if file_url.is_empty() {
        return Err(AppError::Validation("file_url is required".to_string()));
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    tracing::debug!("📄 Building config for {} (user {})", file_name, context.user_id);

    let request = BuildConfig {
        user_id: context.user_id.clone(),
        meeting_id: context.meeting().map(str::to_string),
        user_agent,
        file_name,
        file_url,
        language: payload.language.filter(|lang| !lang.trim().is_empty()),
    };

    let config = with_deadline(
        REQUEST_DEADLINE,
        "build config",
        state.assembler.assemble(request),
    )
    .await?;

    Ok((StatusCode::OK, Json(config)).into_response())
}
