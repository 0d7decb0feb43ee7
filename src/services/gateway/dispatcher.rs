use crate::domain::conversation::Conversation;
use crate::domain::user::User;
use crate::error::{AppError, Result};
use crate::protocol::{ClientEvent, PresenceStatus, ServerEvent};
use crate::services::conversation_service::ConversationService;
use crate::services::gateway::Metrics;
use crate::services::gateway::channel::{ChannelRegistry, ConnectionId};
use crate::services::message_service::{MessageDraft, MessageService};
use opentelemetry::KeyValue;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identity of one admitted connection.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) connection_id: ConnectionId,
    pub(crate) user: User,
    pub(crate) conversation_id: Uuid,
}

/// Applies inbound events to the store and fans the results out to the channel.
///
/// Only malformed frames and pings produce a reply for the originating
/// connection. Events failing a precondition are dropped without notice.
#[derive(Clone, Debug)]
pub(crate) struct EventDispatcher {
    conversations: ConversationService,
    messages: MessageService,
    registry: Arc<ChannelRegistry>,
    metrics: Metrics,
}

impl EventDispatcher {
    pub(crate) fn new(
        conversations: ConversationService,
        messages: MessageService,
        registry: Arc<ChannelRegistry>,
        metrics: Metrics,
    ) -> Self {
        Self { conversations, messages, registry, metrics }
    }

    /// Handles one text frame and returns the local reply, if any.
    pub(crate) async fn handle_text(&self, ctx: &ConnectionContext, text: &str) -> Option<ServerEvent> {
        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.malformed_total.add(1, &[]);
                tracing::debug!(error = %e, "Rejected malformed frame");
                let message = match e {
                    AppError::MalformedPayload(msg) => msg,
                    other => other.to_string(),
                };
                return Some(ServerEvent::Error { message });
            }
        };

        let name = event.name();
        self.metrics.events_total.add(1, &[KeyValue::new("type", name)]);

        match self.dispatch(ctx, event).await {
            Ok(reply) => reply,
            Err(e) => {
                self.metrics.events_dropped_total.add(1, &[KeyValue::new("type", name)]);
                match e {
                    AppError::Database(_) | AppError::Internal => {
                        tracing::error!(error = %e, event = name, "Event failed");
                    }
                    _ => tracing::debug!(error = %e, event = name, "Event dropped"),
                }
                None
            }
        }
    }

    /// Announces a connection to the rest of its channel.
    pub(crate) fn announce_presence(&self, ctx: &ConnectionContext, status: PresenceStatus) {
        let event = ServerEvent::Presence { user_id: ctx.user.id, username: ctx.user.username.clone(), status };
        self.registry.broadcast(ctx.conversation_id, &event, Some(ctx.connection_id));
    }

    #[tracing::instrument(level = "debug", skip_all, fields(event = event.name()))]
    async fn dispatch(&self, ctx: &ConnectionContext, event: ClientEvent) -> Result<Option<ServerEvent>> {
        if matches!(event, ClientEvent::Ping) {
            return Ok(Some(ServerEvent::Pong));
        }

        // Membership is re-checked per event; it may change while the connection is open.
        let conversation = self.conversations.find_for_member(ctx.conversation_id, ctx.user.id).await?;

        match event {
            ClientEvent::ChatMessage { content, reply_to_id, attachments } => {
                let draft = MessageDraft {
                    content,
                    reply_to_id,
                    attachments: attachments.into_iter().map(Into::into).collect(),
                };
                self.send(&conversation, &ctx.user, draft).await?;
            }
            ClientEvent::Typing { is_typing } => {
                let event = ServerEvent::Typing { user_id: ctx.user.id, username: ctx.user.username.clone(), is_typing };
                self.registry.broadcast(conversation.id, &event, Some(ctx.connection_id));
            }
            ClientEvent::ReadReceipt { message_id } => {
                let message = self.messages.find(&conversation, message_id).await?;
                let receipt = self.messages.delivery().mark_read(&message, &conversation, ctx.user.id).await?;
                let event = ServerEvent::ReadReceipt {
                    message_id,
                    user_id: ctx.user.id,
                    username: ctx.user.username.clone(),
                    read_at: receipt.read_at.unwrap_or_else(OffsetDateTime::now_utc),
                };
                self.registry.broadcast(conversation.id, &event, None);
            }
            ClientEvent::EditMessage { message_id, content } => {
                let edited = self.messages.edit(&conversation, &ctx.user, message_id, &content).await?;
                let view = self.messages.render_for_sender(&conversation, &edited).await?;
                self.registry.broadcast(conversation.id, &ServerEvent::MessageEdited { message: view }, None);
            }
            ClientEvent::DeleteMessage { message_id } => {
                if self.messages.delete(&conversation, &ctx.user, message_id).await?.is_some() {
                    self.registry.broadcast(conversation.id, &ServerEvent::MessageDeleted { message_id }, None);
                }
            }
            ClientEvent::PinMessage { message_id, is_pinned } => {
                self.pin(&conversation, &ctx.user, message_id, is_pinned).await?;
            }
            ClientEvent::Unpin { message_id } => {
                self.pin(&conversation, &ctx.user, message_id, false).await?;
            }
            ClientEvent::Ping => return Ok(Some(ServerEvent::Pong)),
        }

        Ok(None)
    }

    /// Stores the message with its delivery receipts, then announces it once the write has committed.
    async fn send(&self, conversation: &Conversation, sender: &User, draft: MessageDraft) -> Result<()> {
        let message = self.messages.send(conversation, sender, draft).await?;
        let view = self.messages.render_created(conversation, &message, sender).await?;
        self.registry.broadcast(conversation.id, &ServerEvent::MessageCreated { message: view }, None);
        Ok(())
    }

    async fn pin(&self, conversation: &Conversation, actor: &User, message_id: Uuid, pinned: bool) -> Result<()> {
        let message = self.messages.set_pinned(conversation, actor, message_id, pinned).await?;
        let view = self.messages.render_for_sender(conversation, &message).await?;
        self.registry.broadcast(conversation.id, &ServerEvent::MessagePinned { message: view }, None);
        Ok(())
    }
}
