use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;

use crate::{
    models::callback::{
        CallbackQuery, CallbackRequest, CallbackResponse, STATUS_CLOSED, STATUS_EDITING,
        STATUS_READY_FOR_SAVE,
    },
    services::removal::RemovalRequest,
    state::AppState,
    tasks::with_deadline,
    validation::callback::validate_callback,
};

const REFRESH_DEADLINE: Duration = Duration::from_secs(10);

fn reply(status: StatusCode, body: CallbackResponse) -> Response {
    (status, Json(body)).into_response()
}

fn failed(status: StatusCode) -> Response {
    reply(status, CallbackResponse::FAILED)
}

/// Receives document editor status callbacks.
///
/// The first editor opening a meeting document confirms the meeting's
/// session. Closing or saving the document ends it.
pub async fn editor_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    payload: Result<Json<CallbackRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = payload else {
        tracing::warn!("Could not decode a callback body");
        return failed(StatusCode::BAD_REQUEST);
    };

    let token = body.token.trim();
    if token.is_empty() {
        tracing::warn!("Callback without a token");
        return failed(StatusCode::BAD_REQUEST);
    }

    let callback: CallbackRequest = match state.signer.verify_unexpiring(token) {
        Ok(callback) => callback,
        Err(e) => {
            tracing::warn!("🚫 Callback token rejected: {}", e);
            return failed(StatusCode::FORBIDDEN);
        }
    };

    if let Err(e) = validate_callback(&callback) {
        tracing::warn!("Invalid callback: {}", e);
        return failed(StatusCode::BAD_REQUEST);
    }

    let Some(meeting_key) = query.meeting_key() else {
        return reply(StatusCode::OK, CallbackResponse::OK);
    };

    match callback.status {
        STATUS_EDITING if callback.users.len() == 1 => {
            let refreshed = with_deadline(
                REFRESH_DEADLINE,
                "refresh session",
                state.sessions.refresh(meeting_key),
            )
            .await;
            if let Err(e) = refreshed {
                tracing::error!("Could not confirm session for {}: {}", callback.key, e);
                return failed(StatusCode::BAD_REQUEST);
            }
            tracing::info!("✅ Session confirmed by editor for document {}", callback.key);
        }
        STATUS_READY_FOR_SAVE | STATUS_CLOSED => {
            let request = RemovalRequest::Session {
                meeting_key: meeting_key.to_string(),
            };
            if let Err(e) = state.removals.publish(&request).await {
                tracing::error!("Could not request session removal: {}", e);
                return failed(StatusCode::INTERNAL_SERVER_ERROR);
            }
            tracing::info!("🗑️ Session removal requested for document {}", callback.key);
        }
        _ => {}
    }

    reply(StatusCode::OK, CallbackResponse::OK)
}
