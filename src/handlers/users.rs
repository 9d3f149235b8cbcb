use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    error::Result,
    models::credential::Credential,
    state::{AppState, REQUEST_DEADLINE},
    tasks::with_deadline,
};

/// Returns the user's decrypted credential, refreshed when it is close to expiry.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response> {
    let credential = with_deadline(
        REQUEST_DEADLINE,
        "get user",
        state.identity.resolve(user_id.trim()),
    )
    .await?;

    Ok((StatusCode::OK, Json(credential)).into_response())
}

pub async fn upsert_user(
    State(state): State<AppState>,
    Json(credential): Json<Credential>,
) -> Result<Response> {
    with_deadline(REQUEST_DEADLINE, "upsert user", state.tokens.put(&credential)).await?;
    tracing::info!("✅ Credential stored for user {}", credential.user_id);

    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response> {
    with_deadline(REQUEST_DEADLINE, "delete user", state.tokens.delete(user_id.trim())).await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}
