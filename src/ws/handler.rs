//! WebSocket upgrade endpoint for the extension.

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use log::info;

use crate::api::AppState;

/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    info!("[ws] extension upgrade request");
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| hub.run_session(socket))
}
