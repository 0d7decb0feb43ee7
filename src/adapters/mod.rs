use crate::domain::community::Community;
use crate::domain::conversation::Conversation;
use crate::domain::message::{Message, NewMessage};
use crate::domain::receipt::ReadReceipt;
use crate::domain::user::User;
use crate::error::Result;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

pub mod database;
pub mod memory;

/// Storage for users, conversations, messages and receipts.
///
/// Each mutating method is a single atomic unit. Conditional mutations return
/// `Ok(None)` when their precondition no longer holds at write time.
#[async_trait]
pub trait ChatStore: Send + Sync + std::fmt::Debug {
    async fn ping(&self) -> Result<()>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>>;

    async fn find_users(&self, user_ids: &[Uuid]) -> Result<Vec<User>>;

    async fn find_community(&self, community_id: Uuid) -> Result<Option<Community>>;

    async fn is_subscribed(&self, community_id: Uuid, user_id: Uuid) -> Result<bool>;

    async fn find_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>>;

    /// Returns the two-party conversation keyed on the unordered pair and the
    /// community context, creating it with `conversation_id` when absent.
    ///
    /// The flag is `true` only for the caller whose write created it; concurrent
    /// openers of the same pair all receive the same conversation.
    async fn open_direct_conversation(
        &self,
        conversation_id: Uuid,
        first: Uuid,
        second: Uuid,
        community_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<(Conversation, bool)>;

    async fn create_conversation(
        &self,
        conversation_id: Uuid,
        participants: &[Uuid],
        community_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<Conversation>;

    /// Adds a participant. Fails with `ValidationFailed` if already present.
    async fn add_participant(&self, conversation_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<Conversation>;

    /// Conversations of a user, most recently active first.
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>>;

    /// Stores the message with its attachments, bumps the conversation's
    /// `last_message_at` and creates a delivered receipt per recipient, all in one write.
    async fn create_message(&self, message: NewMessage, recipients: &[Uuid]) -> Result<Message>;

    async fn find_message(&self, message_id: Uuid) -> Result<Option<Message>>;

    /// Messages in creation order. Deleted messages are only returned to their sender.
    async fn list_messages(&self, conversation_id: Uuid, viewer: Uuid) -> Result<Vec<Message>>;

    async fn last_visible_message(&self, conversation_id: Uuid) -> Result<Option<Message>>;

    /// Replaces the content if `sender_id` sent it, it is not deleted and it was
    /// created no earlier than `editable_since`.
    async fn edit_message(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        content: &str,
        at: OffsetDateTime,
        editable_since: OffsetDateTime,
    ) -> Result<Option<Message>>;

    /// Soft-deletes a message sent by `sender_id` that is not already deleted.
    async fn soft_delete_message(&self, message_id: Uuid, sender_id: Uuid, at: OffsetDateTime)
    -> Result<Option<Message>>;

    /// Sets the pinned flag of a message that is not deleted.
    async fn set_pinned(&self, message_id: Uuid, pinned: bool, at: OffsetDateTime) -> Result<Option<Message>>;

    /// Upserts the receipt and sets `read_at` only if it was unset.
    async fn mark_read(&self, message_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<ReadReceipt>;

    async fn receipts_for(&self, message_ids: &[Uuid]) -> Result<Vec<ReadReceipt>>;

    /// Marks every message not sent by `user_id` as read. Returns the number of receipts changed.
    async fn mark_conversation_read(&self, conversation_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<u64>;

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> Result<i64>;
}
