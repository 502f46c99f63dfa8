//! Route definitions.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::ws::ws_handler;

use super::chat::chat_completions;
use super::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/ws", get(ws_handler))
        .layer(trace_layer)
        .with_state(state)
}
