//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{get, patch, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};

use crate::auth::{AuthState, auth_middleware};

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.auth);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let auth_state = state.auth.clone();

    let protected_routes = Router::new()
        .route("/chat", get(handlers::list_chats).post(handlers::create_chat))
        .route("/chat/stream", post(handlers::stream_turn))
        .route("/chat/archive-all", post(handlers::archive_all))
        .route("/chat/{id}/messages", get(handlers::list_messages))
        .route("/chat/{id}/rename", patch(handlers::rename_chat))
        .route("/chat/{id}/archive", patch(handlers::archive_chat))
        .route("/chat/{id}/unarchive", patch(handlers::unarchive_chat))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/token", post(handlers::issue_token))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(trace_layer)
        .layer(cors)
}

/// Cross-origin policy for browser clients.
///
/// Dev mode with no configured origins mirrors the caller. Otherwise only the
/// configured origins pass; an empty list admits none.
fn cors_layer(auth: &AuthState) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]);

    if auth.allowed_origins().is_empty() && auth.is_dev_mode() {
        warn!("no CORS origins configured in dev mode; mirroring request origin");
        return layer.allow_origin(AllowOrigin::mirror_request());
    }

    let origins: Vec<HeaderValue> = auth
        .allowed_origins()
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) if origin != "*" => Some(value),
            _ => {
                warn!(%origin, "ignoring CORS origin");
                None
            }
        })
        .collect();
    info!(count = origins.len(), "CORS origins configured");
    layer.allow_origin(AllowOrigin::list(origins))
}
