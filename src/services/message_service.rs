use crate::adapters::ChatStore;
use crate::config::MessagingConfig;
use crate::domain::attachment::NewAttachment;
use crate::domain::conversation::Conversation;
use crate::domain::message::{Message, MessageState, NewMessage};
use crate::domain::permissions::resolve_permissions;
use crate::domain::receipt::ReadReceipt;
use crate::domain::user::User;
use crate::error::{AppError, Result};
use crate::protocol::{AttachmentView, MessageView, ReceiptView, ReplyView, UserSummary};
use crate::services::delivery_tracker::DeliveryTracker;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    sent_total: Counter<u64>,
    mutations_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("confide-server");
        Self {
            sent_total: meter
                .u64_counter("messaging_sent_total")
                .with_description("Total number of messages stored")
                .build(),
            mutations_total: meter
                .u64_counter("messaging_mutations_total")
                .with_description("Total number of message edits, deletions and pin changes")
                .build(),
        }
    }
}

/// Client input for a new message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub attachments: Vec<NewAttachment>,
}

/// Message lifecycle rules: creation, edit window, soft deletion and pinning.
#[derive(Clone, Debug)]
pub struct MessageService {
    store: Arc<dyn ChatStore>,
    delivery: DeliveryTracker,
    edit_window: Duration,
    metrics: Metrics,
}

impl MessageService {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, delivery: DeliveryTracker, config: &MessagingConfig) -> Self {
        Self { store, delivery, edit_window: Duration::seconds(config.edit_window_secs), metrics: Metrics::new() }
    }

    #[must_use]
    pub const fn delivery(&self) -> &DeliveryTracker {
        &self.delivery
    }

    /// Stores a new message from `sender` with a delivered receipt for every
    /// other participant, as one write.
    ///
    /// # Errors
    /// Returns `AppError::NotParticipant` if the sender is not in the conversation.
    /// Returns `AppError::ValidationFailed` if there is neither content nor an attachment,
    /// or the reply target lives in another conversation.
    #[tracing::instrument(
        err(level = "debug"),
        skip(self, conversation, sender, draft),
        fields(conversation_id = %conversation.id, sender_id = %sender.id, message_id = tracing::field::Empty)
    )]
    pub async fn send(&self, conversation: &Conversation, sender: &User, draft: MessageDraft) -> Result<Message> {
        if !conversation.is_participant(sender.id) {
            return Err(AppError::NotParticipant);
        }

        let content = draft.content.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        if content.is_none() && draft.attachments.is_empty() {
            return Err(AppError::ValidationFailed("Message must have content or an attachment".into()));
        }

        if let Some(reply_to_id) = draft.reply_to_id {
            let target = self.store.find_message(reply_to_id).await?;
            if !target.is_some_and(|t| t.conversation_id == conversation.id) {
                return Err(AppError::ValidationFailed("Reply target is not in this conversation".into()));
            }
        }

        let new_message = NewMessage {
            id: Uuid::now_v7(),
            conversation_id: conversation.id,
            sender_id: sender.id,
            content,
            reply_to_id: draft.reply_to_id,
            attachments: draft.attachments,
            created_at: OffsetDateTime::now_utc(),
        };
        tracing::Span::current().record("message_id", tracing::field::display(new_message.id));

        let message = self.delivery.record_delivery(new_message, conversation).await?;
        self.metrics.sent_total.add(1, &[]);
        Ok(message)
    }

    /// Replaces the content of one of the actor's messages inside the edit window.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the message is not in the conversation.
    /// Returns `AppError::PermissionDenied` if the actor did not send it.
    /// Returns `AppError::ValidationFailed` for empty content, a deleted message or an expired window.
    #[tracing::instrument(
        err(level = "debug"),
        skip(self, conversation, actor, content),
        fields(conversation_id = %conversation.id, actor_id = %actor.id, message_id = %message_id)
    )]
    pub async fn edit(&self, conversation: &Conversation, actor: &User, message_id: Uuid, content: &str) -> Result<Message> {
        let message = self.find(conversation, message_id).await?;
        let now = OffsetDateTime::now_utc();

        if message.sender_id != actor.id {
            return Err(AppError::PermissionDenied);
        }
        if !resolve_permissions(actor, &message, None, now, self.edit_window).can_edit {
            return Err(AppError::ValidationFailed("Message can no longer be edited".into()));
        }

        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::ValidationFailed("Message content cannot be empty".into()));
        }

        let edited = self
            .store
            .edit_message(message_id, actor.id, content, now, now - self.edit_window)
            .await?
            .ok_or_else(|| AppError::ValidationFailed("Message can no longer be edited".into()))?;

        self.metrics.mutations_total.add(1, &[KeyValue::new("kind", "edit")]);
        Ok(edited)
    }

    /// Soft-deletes one of the actor's messages.
    ///
    /// Returns `None` when the message was already deleted.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the message is not in the conversation.
    /// Returns `AppError::PermissionDenied` if the actor did not send it.
    #[tracing::instrument(
        err(level = "debug"),
        skip(self, conversation, actor),
        fields(conversation_id = %conversation.id, actor_id = %actor.id, message_id = %message_id)
    )]
    pub async fn delete(&self, conversation: &Conversation, actor: &User, message_id: Uuid) -> Result<Option<Message>> {
        let message = self.find(conversation, message_id).await?;
        if message.state() == MessageState::Deleted {
            return Ok(None);
        }
        let now = OffsetDateTime::now_utc();
        if !resolve_permissions(actor, &message, None, now, self.edit_window).can_delete {
            return Err(AppError::PermissionDenied);
        }

        let deleted = self.store.soft_delete_message(message_id, actor.id, now).await?;
        if deleted.is_some() {
            self.metrics.mutations_total.add(1, &[KeyValue::new("kind", "delete")]);
        }
        Ok(deleted)
    }

    /// Pins or unpins a live message.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the message is not in the conversation.
    /// Returns `AppError::ValidationFailed` if the message is deleted.
    /// Returns `AppError::PermissionDenied` unless the actor is the sender, the
    /// community moderator or a super admin.
    #[tracing::instrument(
        err(level = "debug"),
        skip(self, conversation, actor),
        fields(conversation_id = %conversation.id, actor_id = %actor.id, message_id = %message_id)
    )]
    pub async fn set_pinned(
        &self,
        conversation: &Conversation,
        actor: &User,
        message_id: Uuid,
        pinned: bool,
    ) -> Result<Message> {
        let message = self.find(conversation, message_id).await?;
        if message.state() == MessageState::Deleted {
            return Err(AppError::ValidationFailed("Deleted messages cannot be pinned".into()));
        }

        let moderator_id = self.moderator_of(conversation).await?;
        let now = OffsetDateTime::now_utc();
        if !resolve_permissions(actor, &message, moderator_id, now, self.edit_window).can_pin {
            return Err(AppError::PermissionDenied);
        }

        let updated = self
            .store
            .set_pinned(message_id, pinned, now)
            .await?
            .ok_or_else(|| AppError::ValidationFailed("Deleted messages cannot be pinned".into()))?;

        self.metrics.mutations_total.add(1, &[KeyValue::new("kind", if pinned { "pin" } else { "unpin" })]);
        Ok(updated)
    }

    /// Loads a message that must belong to `conversation`.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if it does not exist there.
    pub async fn find(&self, conversation: &Conversation, message_id: Uuid) -> Result<Message> {
        self.store
            .find_message(message_id)
            .await?
            .filter(|m| m.conversation_id == conversation.id)
            .ok_or(AppError::NotFound)
    }

    /// Messages visible to `viewer`, oldest first.
    ///
    /// # Errors
    /// Returns `AppError::NotParticipant` if the viewer is not in the conversation.
    #[tracing::instrument(err(level = "debug"), skip(self, conversation, viewer), fields(conversation_id = %conversation.id))]
    pub async fn history(&self, conversation: &Conversation, viewer: &User) -> Result<Vec<MessageView>> {
        if !conversation.is_participant(viewer.id) {
            return Err(AppError::NotParticipant);
        }
        let messages = self.store.list_messages(conversation.id, viewer.id).await?;
        self.render(conversation, &messages, viewer).await
    }

    /// Renders a just-created message as its sender saw it before any
    /// recipient acknowledged it, the shape of `message_created`.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the sender no longer exists.
    pub async fn render_created(&self, conversation: &Conversation, message: &Message, sender: &User) -> Result<MessageView> {
        self.assemble(conversation, std::slice::from_ref(message), sender, &[]).await?.pop().ok_or(AppError::Internal)
    }

    /// Renders one message for `viewer`.
    ///
    /// # Errors
    /// Returns `AppError::Database` if related data cannot be loaded.
    pub async fn render_one(&self, conversation: &Conversation, message: &Message, viewer: &User) -> Result<MessageView> {
        self.render(conversation, std::slice::from_ref(message), viewer).await?.pop().ok_or(AppError::Internal)
    }

    /// Renders a message from its sender's point of view, the shape broadcast to a channel.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the sender no longer exists.
    pub async fn render_for_sender(&self, conversation: &Conversation, message: &Message) -> Result<MessageView> {
        let sender = self.store.find_user(message.sender_id).await?.ok_or(AppError::Internal)?;
        self.render_one(conversation, message, &sender).await
    }

    /// Renders messages with their sender, reply target, receipts and the
    /// viewer-relative `status` and `can_edit`.
    ///
    /// # Errors
    /// Returns `AppError::Database` if related data cannot be loaded.
    pub async fn render(&self, conversation: &Conversation, messages: &[Message], viewer: &User) -> Result<Vec<MessageView>> {
        let message_ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let receipts = self.delivery.receipts_for(&message_ids).await?;
        self.assemble(conversation, messages, viewer, &receipts).await
    }

    async fn assemble(
        &self,
        conversation: &Conversation,
        messages: &[Message],
        viewer: &User,
        receipts: &[ReadReceipt],
    ) -> Result<Vec<MessageView>> {
        let mut replies: HashMap<Uuid, Message> = HashMap::new();
        for reply_to_id in messages.iter().filter_map(|m| m.reply_to_id) {
            if replies.contains_key(&reply_to_id) {
                continue;
            }
            if let Some(target) = self.store.find_message(reply_to_id).await? {
                replies.insert(reply_to_id, target);
            }
        }

        let mut user_ids: Vec<Uuid> =
            messages.iter().map(|m| m.sender_id).chain(replies.values().map(|m| m.sender_id)).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        let users: HashMap<Uuid, User> =
            self.store.find_users(&user_ids).await?.into_iter().map(|u| (u.id, u)).collect();

        let now = OffsetDateTime::now_utc();
        messages
            .iter()
            .map(|message| {
                let sender = users.get(&message.sender_id).ok_or_else(|| {
                    tracing::error!(message_id = %message.id, "Message sender missing");
                    AppError::Internal
                })?;
                let reply_to = message.reply_to_id.and_then(|id| replies.get(&id)).and_then(|target| {
                    users.get(&target.sender_id).map(|reply_sender| reply_view(target, reply_sender, viewer))
                });
                let message_receipts: Vec<ReadReceipt> =
                    receipts.iter().filter(|r| r.message_id == message.id).copied().collect();

                Ok(MessageView {
                    id: message.id,
                    conversation: message.conversation_id,
                    sender: UserSummary::from(sender),
                    content: message.content.clone(),
                    reply_to,
                    is_edited: message.edited,
                    is_pinned: message.pinned,
                    is_deleted: message.deleted,
                    created_at: message.created_at,
                    updated_at: message.updated_at,
                    edited_at: message.edited_at,
                    attachments: message.attachments.iter().map(AttachmentView::from).collect(),
                    message_reads: message_receipts.iter().map(ReceiptView::from).collect(),
                    status: self.delivery.status_for(message, conversation, &message_receipts, viewer.id),
                    can_edit: resolve_permissions(viewer, message, None, now, self.edit_window).can_edit,
                })
            })
            .collect()
    }

    async fn moderator_of(&self, conversation: &Conversation) -> Result<Option<Uuid>> {
        match conversation.community_id {
            Some(community_id) => Ok(self.store.find_community(community_id).await?.map(|c| c.moderator_id)),
            None => Ok(None),
        }
    }
}

/// Deleted reply targets keep their envelope but hide their content from everyone but the sender.
fn reply_view(target: &Message, sender: &User, viewer: &User) -> ReplyView {
    let hidden = target.deleted && target.sender_id != viewer.id;
    ReplyView {
        id: target.id,
        sender: UserSummary::from(sender),
        content: if hidden { None } else { target.content.clone() },
        attachments: if hidden { Vec::new() } else { target.attachments.iter().map(AttachmentView::from).collect() },
        created_at: target.created_at,
        is_deleted: target.deleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryChatStore;
    use crate::domain::community::Community;
    use crate::domain::receipt::MessageStatus;
    use crate::domain::user::Role;

    struct Fixture {
        store: Arc<MemoryChatStore>,
        service: MessageService,
        alice: User,
        bob: User,
        conversation: Conversation,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryChatStore::new());
        let alice = User::new("alice", Role::User);
        let bob = User::new("bob", Role::Admin);
        store.insert_user(alice.clone()).unwrap();
        store.insert_user(bob.clone()).unwrap();
        let community = Community::new("late night thoughts", bob.id);
        store.insert_community(community.clone()).unwrap();
        let conversation = store
            .create_conversation(Uuid::now_v7(), &[alice.id, bob.id], Some(community.id), OffsetDateTime::now_utc())
            .await
            .unwrap();
        let delivery = DeliveryTracker::new(store.clone());
        let service = MessageService::new(store.clone(), delivery, &MessagingConfig { edit_window_secs: 600 });
        Fixture { store, service, alice, bob, conversation }
    }

    fn text(content: &str) -> MessageDraft {
        MessageDraft { content: Some(content.into()), ..MessageDraft::default() }
    }

    #[tokio::test]
    async fn test_send_trims_and_requires_content() {
        let f = fixture().await;

        let msg = f.service.send(&f.conversation, &f.alice, text("  hello  ")).await.unwrap();
        assert_eq!(msg.content.as_deref(), Some("hello"));

        let err = f.service.send(&f.conversation, &f.alice, text("   ")).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_send_accepts_attachment_only() {
        let f = fixture().await;
        let draft = MessageDraft {
            attachments: vec![NewAttachment {
                file: "uploads/cat.png".into(),
                file_name: "cat.png".into(),
                file_size: 1024,
                mime_type: "image/png".into(),
            }],
            ..MessageDraft::default()
        };

        let msg = f.service.send(&f.conversation, &f.alice, draft).await.unwrap();
        assert!(msg.content.is_none());
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.preview(), "[Attachment]");
    }

    #[tokio::test]
    async fn test_reply_must_stay_in_conversation() {
        let f = fixture().await;
        let carol = User::new("carol", Role::SuperAdmin);
        f.store.insert_user(carol.clone()).unwrap();
        let other = f
            .store
            .create_conversation(Uuid::now_v7(), &[f.alice.id, carol.id], None, OffsetDateTime::now_utc())
            .await
            .unwrap();
        let foreign = f.service.send(&other, &f.alice, text("elsewhere")).await.unwrap();
        let local = f.service.send(&f.conversation, &f.bob, text("here")).await.unwrap();

        let draft = MessageDraft { reply_to_id: Some(foreign.id), ..text("re") };
        assert!(matches!(
            f.service.send(&f.conversation, &f.alice, draft).await,
            Err(AppError::ValidationFailed(_))
        ));

        let draft = MessageDraft { reply_to_id: Some(local.id), ..text("re") };
        let reply = f.service.send(&f.conversation, &f.alice, draft).await.unwrap();
        let view = f.service.render_one(&f.conversation, &reply, &f.alice).await.unwrap();
        assert_eq!(view.reply_to.map(|r| r.id), Some(local.id));
    }

    #[tokio::test]
    async fn test_edit_window_and_ownership() {
        let f = fixture().await;
        let msg = f.service.send(&f.conversation, &f.alice, text("first")).await.unwrap();

        assert!(matches!(
            f.service.edit(&f.conversation, &f.bob, msg.id, "hijack").await,
            Err(AppError::PermissionDenied)
        ));

        let edited = f.service.edit(&f.conversation, &f.alice, msg.id, "second").await.unwrap();
        assert!(edited.edited);
        assert!(edited.edited_at.is_some());

        f.store.backdate_message(msg.id, Duration::minutes(11)).unwrap();
        assert!(matches!(
            f.service.edit(&f.conversation, &f.alice, msg.id, "third").await,
            Err(AppError::ValidationFailed(_))
        ));
        let stored = f.service.find(&f.conversation, msg.id).await.unwrap();
        assert_eq!(stored.content.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_delete_is_soft_and_terminal() {
        let f = fixture().await;
        let msg = f.service.send(&f.conversation, &f.alice, text("oops")).await.unwrap();

        assert!(matches!(f.service.delete(&f.conversation, &f.bob, msg.id).await, Err(AppError::PermissionDenied)));
        assert!(f.service.delete(&f.conversation, &f.alice, msg.id).await.unwrap().is_some());
        assert!(f.service.delete(&f.conversation, &f.alice, msg.id).await.unwrap().is_none());

        let stored = f.service.find(&f.conversation, msg.id).await.unwrap();
        assert!(stored.deleted);
        assert!(f.service.edit(&f.conversation, &f.alice, msg.id, "back").await.is_err());
        assert!(matches!(
            f.service.set_pinned(&f.conversation, &f.alice, msg.id, true).await,
            Err(AppError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_pin_rights() {
        let f = fixture().await;
        let msg = f.service.send(&f.conversation, &f.alice, text("pin me")).await.unwrap();
        let outsider = User::new("dave", Role::Admin);
        f.store.insert_user(outsider.clone()).unwrap();

        assert!(matches!(
            f.service.set_pinned(&f.conversation, &outsider, msg.id, true).await,
            Err(AppError::PermissionDenied)
        ));
        // bob moderates the community this conversation belongs to
        assert!(f.service.set_pinned(&f.conversation, &f.bob, msg.id, true).await.unwrap().pinned);
        assert!(!f.service.set_pinned(&f.conversation, &f.alice, msg.id, false).await.unwrap().pinned);
    }

    #[tokio::test]
    async fn test_history_hides_deleted_from_others() {
        let f = fixture().await;
        let keep = f.service.send(&f.conversation, &f.alice, text("keep")).await.unwrap();
        let gone = f.service.send(&f.conversation, &f.alice, text("gone")).await.unwrap();
        f.service.delete(&f.conversation, &f.alice, gone.id).await.unwrap();

        let for_bob = f.service.history(&f.conversation, &f.bob).await.unwrap();
        assert_eq!(for_bob.iter().map(|v| v.id).collect::<Vec<_>>(), vec![keep.id]);
        assert_eq!(for_bob[0].status, MessageStatus::Received);
        assert!(!for_bob[0].can_edit);

        let for_alice = f.service.history(&f.conversation, &f.alice).await.unwrap();
        assert_eq!(for_alice.len(), 2);
        assert!(for_alice[0].can_edit);
        assert_eq!(for_alice[0].status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_send_stores_receipts_but_announces_sent() {
        let f = fixture().await;
        let msg = f.service.send(&f.conversation, &f.alice, text("hello")).await.unwrap();

        let receipts = f.store.receipts_for(&[msg.id]).await.unwrap();
        assert_eq!(receipts.iter().map(|r| r.user_id).collect::<Vec<_>>(), vec![f.bob.id]);

        let announced = f.service.render_created(&f.conversation, &msg, &f.alice).await.unwrap();
        assert_eq!(announced.status, MessageStatus::Sent);
        assert!(announced.message_reads.is_empty());
        let rendered = f.service.render_one(&f.conversation, &msg, &f.alice).await.unwrap();
        assert_eq!(rendered.status, MessageStatus::Delivered);
    }
}
