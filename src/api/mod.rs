use crate::config::Config;
use crate::services::auth_service::AuthService;
use crate::services::conversation_service::ConversationService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use axum::body::Body;
use axum::http::Request;
use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod conversations;
pub mod dto;
pub mod gateway;
pub mod health;
pub mod messages;
pub mod middleware;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub auth_service: AuthService,
    pub conversation_service: ConversationService,
    pub message_service: MessageService,
    pub gateway_service: GatewayService,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub health_service: HealthService,
}

#[derive(Debug, Clone)]
pub struct ServiceContainer {
    pub auth_service: AuthService,
    pub conversation_service: ConversationService,
    pub message_service: MessageService,
    pub gateway_service: GatewayService,
    pub health_service: HealthService,
}

/// Configures and returns the primary application router.
pub fn app_router(
    config: Config,
    services: ServiceContainer,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Router {
    let state = AppState {
        config,
        auth_service: services.auth_service,
        conversation_service: services.conversation_service,
        message_service: services.message_service,
        gateway_service: services.gateway_service,
        shutdown_rx,
    };

    let api_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations).post(conversations::open_conversation))
        .route("/conversations/unread", get(conversations::unread_total))
        .route("/conversations/{conversationId}", get(conversations::get_conversation))
        .route("/conversations/{conversationId}/messages", get(conversations::list_messages))
        .route("/conversations/{conversationId}/unread", get(conversations::unread_count))
        .route("/conversations/{conversationId}/read", post(conversations::mark_read))
        .route("/conversations/{conversationId}/participants", post(conversations::add_participant))
        .route("/messages/{messageId}", delete(messages::delete_message))
        .route("/messages/{messageId}/read", post(messages::mark_message_read))
        .route("/messages/{messageId}/pin", post(messages::pin_message))
        .route("/messages/{messageId}/unpin", post(messages::unpin_message));

    Router::new()
        .route("/ws/chat/{conversationId}", get(gateway::websocket_handler))
        .nest("/v1", api_routes)
        .layer(PropagateRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id")))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<tower_http::request_id::RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                        "user_id" = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        let status = response.status();
                        span.record("http.response.status_code", status.as_u16());

                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %status.as_u16(),
                            "request completed"
                        );
                    },
                )
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id"), MakeRequestUuid))
        .with_state(state)
}

pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new().route("/livez", get(health::livez)).route("/readyz", get(health::readyz)).with_state(state)
}
