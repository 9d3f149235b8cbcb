use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;

use crate::{
    error::Result,
    models::context::AuthenticatedContext,
    state::{AppState, REQUEST_DEADLINE},
    tasks::with_deadline,
};

#[derive(Serialize)]
pub struct OwnerResponse {
    pub owner: String,
}

#[derive(Serialize)]
pub struct OwnerRemoveResponse {
    pub removed: bool,
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(meeting_key): Path<String>,
) -> Result<Response> {
    let session = with_deadline(
        REQUEST_DEADLINE,
        "get session",
        state.sessions.get(&meeting_key),
    )
    .await?;

    Ok((StatusCode::OK, Json(session)).into_response())
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(meeting_key): Path<String>,
) -> Result<Response> {
    with_deadline(
        REQUEST_DEADLINE,
        "delete session",
        state.sessions.delete(&meeting_key),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Promotes the session once the editor has opened the document.
pub async fn refresh_session(
    State(state): State<AppState>,
    Path(meeting_key): Path<String>,
) -> Result<Response> {
    let session = with_deadline(
        REQUEST_DEADLINE,
        "refresh session",
        state.sessions.refresh(&meeting_key),
    )
    .await?;

    Ok((StatusCode::OK, Json(session)).into_response())
}

pub async fn session_owner(
    State(state): State<AppState>,
    Path(meeting_key): Path<String>,
) -> Result<Response> {
    let owner = with_deadline(
        REQUEST_DEADLINE,
        "get session owner",
        state.sessions.owner(&meeting_key),
    )
    .await?;

    Ok((StatusCode::OK, Json(OwnerResponse { owner })).into_response())
}

/// Ends the caller's own session in their current meeting.
pub async fn owner_remove(
    State(state): State<AppState>,
    Extension(context): Extension<AuthenticatedContext>,
) -> Result<Response> {
    let Some(meeting_id) = context.meeting() else {
        return Ok((StatusCode::OK, Json(OwnerRemoveResponse { removed: false })).into_response());
    };

    let removed = with_deadline(
        REQUEST_DEADLINE,
        "owner remove session",
        state.sessions.owner_remove(&context.user_id, meeting_id),
    )
    .await?;

    if removed {
        tracing::info!("🗑️ Session removed by owner {}", context.user_id);
    }

    Ok((StatusCode::OK, Json(OwnerRemoveResponse { removed })).into_response())
}
