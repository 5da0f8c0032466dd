pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

/// Every extracted body (JSON, bytes, multipart) is capped at `max_upload_bytes`.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health::health_handler))
        // Sessions
        .route("/api/v1/sessions", post(handlers::handle_create_session))
        .route("/api/v1/sessions/:id", delete(handlers::handle_delete_session))
        .route(
            "/api/v1/sessions/:id/document",
            get(handlers::handle_get_document).put(handlers::handle_put_document),
        )
        .route(
            "/api/v1/sessions/:id/edit/parse",
            post(handlers::handle_parse_edit),
        )
        .route("/api/v1/sessions/:id/edit", post(handlers::handle_execute_edit))
        .route(
            "/api/v1/sessions/:id/instruction",
            post(handlers::handle_instruction),
        )
        .route(
            "/api/v1/sessions/:id/chat/cancel",
            post(handlers::handle_cancel_chat),
        )
        .route(
            "/api/v1/sessions/:id/cache",
            get(handlers::handle_cache_stats).delete(handlers::handle_clear_cache),
        )
        // Stateless
        .route("/api/v1/patch/resolve", post(handlers::handle_resolve_patch))
        .route("/api/v1/latex/compile", post(handlers::handle_compile))
        .route("/api/v1/latex/template", get(handlers::handle_template))
        .route("/api/v1/ai/models", get(handlers::handle_list_models))
        .route("/api/v1/ai/validate-key", post(handlers::handle_validate_key))
        .route(
            "/api/v1/system/compiler",
            get(handlers::handle_compiler_status),
        )
        .route("/api/v1/upload", post(handlers::handle_upload))
        .route("/api/v1/feedback", post(handlers::handle_feedback))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
