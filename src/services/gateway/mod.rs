pub mod channel;
pub(crate) mod dispatcher;
pub(crate) mod session;

use crate::config::WsConfig;
use crate::domain::auth::Jwt;
use crate::domain::conversation::Conversation;
use crate::domain::user::User;
use crate::error::{AppError, Result};
use crate::protocol::ServerEvent;
use crate::services::auth_service::AuthService;
use crate::services::conversation_service::ConversationService;
use crate::services::gateway::channel::ChannelRegistry;
use crate::services::gateway::dispatcher::{ConnectionContext, EventDispatcher};
use crate::services::gateway::session::Session;
use crate::services::message_service::MessageService;
use axum::extract::ws::WebSocket;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, UpDownCounter},
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) active_connections: UpDownCounter<i64>,
    pub(crate) admissions_rejected_total: Counter<u64>,
    pub(crate) events_total: Counter<u64>,
    pub(crate) events_dropped_total: Counter<u64>,
    pub(crate) malformed_total: Counter<u64>,
    pub(crate) evictions_total: Counter<u64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("confide-server");
        Self {
            active_connections: meter
                .i64_up_down_counter("websocket_active_connections")
                .with_description("Number of active WebSocket connections")
                .build(),
            admissions_rejected_total: meter
                .u64_counter("websocket_admissions_rejected_total")
                .with_description("Total connections refused before upgrade")
                .build(),
            events_total: meter
                .u64_counter("websocket_events_total")
                .with_description("Total inbound events by type")
                .build(),
            events_dropped_total: meter
                .u64_counter("websocket_events_dropped_total")
                .with_description("Total inbound events dropped on a failed precondition")
                .build(),
            malformed_total: meter
                .u64_counter("websocket_malformed_frames_total")
                .with_description("Total inbound frames that could not be decoded")
                .build(),
            evictions_total: meter
                .u64_counter("websocket_evictions_total")
                .with_description("Total connections evicted due to a full outbound buffer")
                .build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection that passed authentication and the membership check.
#[derive(Debug, Clone)]
pub struct Admission {
    pub user: User,
    pub conversation: Conversation,
}

/// Admits realtime connections and runs their sessions.
#[derive(Clone, Debug)]
pub struct GatewayService {
    auth: AuthService,
    conversations: ConversationService,
    dispatcher: EventDispatcher,
    registry: Arc<ChannelRegistry>,
    config: WsConfig,
    metrics: Metrics,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        auth: AuthService,
        conversations: ConversationService,
        messages: MessageService,
        config: WsConfig,
    ) -> Self {
        let metrics = Metrics::new();
        let registry = Arc::new(ChannelRegistry::new(metrics.clone()));
        let dispatcher = EventDispatcher::new(conversations.clone(), messages, registry.clone(), metrics.clone());
        Self { auth, conversations, dispatcher, registry, config, metrics }
    }

    /// Sends an event to every live connection of a conversation. Returns how many received it.
    pub fn publish(&self, conversation_id: Uuid, event: &ServerEvent) -> usize {
        self.registry.broadcast(conversation_id, event, None)
    }

    /// Resolves the token to a user and checks membership of the addressed
    /// conversation, all within the admission timeout.
    ///
    /// # Errors
    /// Returns `AppError::Unauthenticated` for a missing, invalid or orphaned token.
    /// Returns `AppError::NotParticipant` if the user is not in the conversation.
    /// Returns `AppError::AdmissionTimeout` if the checks do not finish in time.
    #[tracing::instrument(err(level = "info"), skip(self, token), fields(conversation_id = %conversation_id))]
    pub async fn admit(&self, token: Option<&str>, conversation_id: Uuid) -> Result<Admission> {
        let limit = Duration::from_secs(self.config.admission_timeout_secs);
        let checks = async {
            let token = token.filter(|t| !t.is_empty()).ok_or(AppError::Unauthenticated)?;
            let user = self.auth.authenticate(&Jwt::new(token)).await?;
            let conversation = self.conversations.find_for_member(conversation_id, user.id).await?;
            Ok::<_, AppError>(Admission { user, conversation })
        };

        let result = tokio::time::timeout(limit, checks).await.unwrap_or(Err(AppError::AdmissionTimeout));
        if let Err(e) = &result {
            let reason = match e {
                AppError::Unauthenticated => "unauthenticated",
                AppError::NotParticipant => "not_participant",
                AppError::AdmissionTimeout => "timeout",
                _ => "error",
            };
            self.metrics.admissions_rejected_total.add(1, &[KeyValue::new("reason", reason)]);
        }
        result
    }

    /// Runs the session of an admitted connection until it disconnects.
    pub async fn handle_socket(
        &self,
        socket: WebSocket,
        admission: Admission,
        request_id: String,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let session = Session {
            ctx: ConnectionContext {
                connection_id: Uuid::new_v4(),
                user: admission.user,
                conversation_id: admission.conversation.id,
            },
            request_id,
            socket,
            dispatcher: self.dispatcher.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            shutdown_rx,
        };

        session.run().await;
    }
}
