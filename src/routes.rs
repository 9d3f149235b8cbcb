use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::{handlers, middleware_layer, state::AppState};

/// Builds the application router over `state`.
pub fn router(state: AppState) -> Router {
    let context_routes = Router::new()
        .route("/api/config", post(handlers::config::build_config))
        .route(
            "/api/sessions/owner-remove",
            post(handlers::sessions::owner_remove),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::context::require_context,
        ))
        .with_state(state.clone());

    let internal_routes = Router::new()
        .route(
            "/api/sessions/{meeting_key}",
            get(handlers::sessions::get_session).delete(handlers::sessions::delete_session),
        )
        .route(
            "/api/sessions/{meeting_key}/refresh",
            post(handlers::sessions::refresh_session),
        )
        .route(
            "/api/sessions/{meeting_key}/owner",
            get(handlers::sessions::session_owner),
        )
        .route("/api/users", put(handlers::users::upsert_user))
        .route(
            "/api/users/{user_id}",
            get(handlers::users::get_user).delete(handlers::users::delete_user),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::internal::require_internal_token,
        ))
        .with_state(state.clone());

    let editor_routes = Router::new()
        .route("/callback", post(handlers::callback::editor_callback))
        .with_state(state);

    Router::new()
        .merge(editor_routes)
        .merge(context_routes)
        .merge(internal_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
}
