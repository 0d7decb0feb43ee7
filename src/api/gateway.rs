use crate::api::AppState;
use axum::{
    extract::{Path, Query, State, ws::WebSocketUpgrade},
    http::Extensions,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tower_http::request_id::RequestId;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// Realtime endpoint for one conversation. Admission runs before the upgrade,
/// so a refused connection gets a plain HTTP error and never a socket.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<WsParams>,
    extensions: Extensions,
    State(state): State<AppState>,
) -> Response {
    let request_id = extensions
        .get::<RequestId>()
        .map(|id| id.header_value().to_str().unwrap_or_default().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match state.gateway_service.admit(params.token.as_deref(), conversation_id).await {
        Ok(admission) => {
            let gateway = state.gateway_service.clone();
            let shutdown_rx = state.shutdown_rx.clone();
            ws.on_upgrade(move |socket| async move {
                gateway.handle_socket(socket, admission, request_id, shutdown_rx).await;
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, %conversation_id, "WebSocket admission refused");
            e.into_response()
        }
    }
}
