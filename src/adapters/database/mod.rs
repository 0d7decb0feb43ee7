pub mod attachment_repo;
pub mod community_repo;
pub mod conversation_repo;
pub mod message_repo;
pub mod receipt_repo;
pub mod records;
pub mod user_repo;

use crate::adapters::ChatStore;
use crate::config::DatabaseConfig;
use crate::domain::community::Community;
use crate::domain::conversation::Conversation;
use crate::domain::message::{Message, NewMessage};
use crate::domain::receipt::ReadReceipt;
use crate::domain::user::User;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use attachment_repo::AttachmentRepository;
use community_repo::CommunityRepository;
use conversation_repo::ConversationRepository;
use message_repo::MessageRepository;
use receipt_repo::ReceiptRepository;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, Pool, Postgres};
use std::time::Duration;
use time::OffsetDateTime;
use user_repo::UserRepository;
use uuid::Uuid;

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(url: &str, config: &DatabaseConfig) -> std::result::Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(url)
        .await
}

/// Postgres-backed [`ChatStore`]. Multi-statement operations run in one transaction.
#[derive(Clone, Debug)]
pub struct PgChatStore {
    pool: DbPool,
    users: UserRepository,
    communities: CommunityRepository,
    conversations: ConversationRepository,
    messages: MessageRepository,
    attachments: AttachmentRepository,
    receipts: ReceiptRepository,
}

impl PgChatStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self {
            pool,
            users: UserRepository::new(),
            communities: CommunityRepository::new(),
            conversations: ConversationRepository::new(),
            messages: MessageRepository::new(),
            attachments: AttachmentRepository::new(),
            receipts: ReceiptRepository::new(),
        }
    }

    /// Registers a user account.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the insert fails.
    pub async fn create_user(&self, user: &User) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.users.create(&mut conn, user).await
    }

    async fn with_attachments(&self, conn: &mut PgConnection, mut messages: Vec<Message>) -> Result<Vec<Message>> {
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let attachments = self.attachments.find_for_messages(conn, &ids).await?;
        for attachment in attachments {
            if let Some(message) = messages.iter_mut().find(|m| m.id == attachment.message_id) {
                message.attachments.push(attachment);
            }
        }
        Ok(messages)
    }

    async fn with_attachments_opt(&self, conn: &mut PgConnection, message: Option<Message>) -> Result<Option<Message>> {
        match message {
            Some(message) => Ok(self.with_attachments(conn, vec![message]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        self.users.find_by_id(&mut conn, user_id).await
    }

    async fn find_users(&self, user_ids: &[Uuid]) -> Result<Vec<User>> {
        let mut conn = self.pool.acquire().await?;
        self.users.find_by_ids(&mut conn, user_ids).await
    }

    async fn find_community(&self, community_id: Uuid) -> Result<Option<Community>> {
        let mut conn = self.pool.acquire().await?;
        self.communities.find_by_id(&mut conn, community_id).await
    }

    async fn is_subscribed(&self, community_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        self.communities.is_subscribed(&mut conn, community_id, user_id).await
    }

    async fn find_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.find_by_id(&mut conn, conversation_id).await
    }

    async fn open_direct_conversation(
        &self,
        conversation_id: Uuid,
        first: Uuid,
        second: Uuid,
        community_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<(Conversation, bool)> {
        let mut tx = self.pool.begin().await?;
        if let Some(id) = self.conversations.find_direct(&mut tx, first, second, community_id).await? {
            let existing = self.conversations.find_by_id(&mut tx, id).await?.ok_or(AppError::Internal)?;
            tx.commit().await?;
            return Ok((existing, false));
        }

        self.conversations.create(&mut tx, conversation_id, &[first, second], community_id, at).await?;
        if self.conversations.claim_direct_key(&mut tx, conversation_id, first, second, community_id).await? {
            let created = self.conversations.find_by_id(&mut tx, conversation_id).await?.ok_or(AppError::Internal)?;
            tx.commit().await?;
            return Ok((created, true));
        }

        // A concurrent opener committed the same pair first; discard ours and return theirs.
        tx.rollback().await?;
        let mut conn = self.pool.acquire().await?;
        let id =
            self.conversations.find_direct(&mut conn, first, second, community_id).await?.ok_or(AppError::Internal)?;
        let existing = self.conversations.find_by_id(&mut conn, id).await?.ok_or(AppError::Internal)?;
        Ok((existing, false))
    }

    async fn create_conversation(
        &self,
        conversation_id: Uuid,
        participants: &[Uuid],
        community_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;
        self.conversations.create(&mut tx, conversation_id, participants, community_id, at).await?;
        let conversation = self.conversations.find_by_id(&mut tx, conversation_id).await?.ok_or(AppError::Internal)?;
        tx.commit().await?;
        Ok(conversation)
    }

    async fn add_participant(&self, conversation_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;
        if self.conversations.find_by_id(&mut tx, conversation_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        self.conversations.add_participant(&mut tx, conversation_id, user_id, at).await?;
        let conversation = self.conversations.find_by_id(&mut tx, conversation_id).await?.ok_or(AppError::Internal)?;
        tx.commit().await?;
        Ok(conversation)
    }

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.list_for_user(&mut conn, user_id).await
    }

    async fn create_message(&self, message: NewMessage, recipients: &[Uuid]) -> Result<Message> {
        let mut tx = self.pool.begin().await?;
        let mut stored = self.messages.create(&mut tx, &message).await?;
        let attachments: Vec<_> =
            message.attachments.into_iter().map(|a| a.into_attachment(message.id, message.created_at)).collect();
        self.attachments.create_batch(&mut tx, &attachments).await?;
        self.conversations.touch_last_message(&mut tx, message.conversation_id, message.created_at).await?;
        self.receipts.record_deliveries(&mut tx, message.id, recipients, message.created_at).await?;
        tx.commit().await?;

        stored.attachments = attachments;
        Ok(stored)
    }

    async fn find_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        let mut conn = self.pool.acquire().await?;
        let message = self.messages.find_by_id(&mut conn, message_id).await?;
        self.with_attachments_opt(&mut conn, message).await
    }

    async fn list_messages(&self, conversation_id: Uuid, viewer: Uuid) -> Result<Vec<Message>> {
        let mut conn = self.pool.acquire().await?;
        let messages = self.messages.list_for_viewer(&mut conn, conversation_id, viewer).await?;
        self.with_attachments(&mut conn, messages).await
    }

    async fn last_visible_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        let mut conn = self.pool.acquire().await?;
        let message = self.messages.find_last_visible(&mut conn, conversation_id).await?;
        self.with_attachments_opt(&mut conn, message).await
    }

    async fn edit_message(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        content: &str,
        at: OffsetDateTime,
        editable_since: OffsetDateTime,
    ) -> Result<Option<Message>> {
        let mut conn = self.pool.acquire().await?;
        let message =
            self.messages.update_content(&mut conn, message_id, sender_id, content, at, editable_since).await?;
        self.with_attachments_opt(&mut conn, message).await
    }

    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Message>> {
        let mut conn = self.pool.acquire().await?;
        let message = self.messages.soft_delete(&mut conn, message_id, sender_id, at).await?;
        self.with_attachments_opt(&mut conn, message).await
    }

    async fn set_pinned(&self, message_id: Uuid, pinned: bool, at: OffsetDateTime) -> Result<Option<Message>> {
        let mut conn = self.pool.acquire().await?;
        let message = self.messages.set_pinned(&mut conn, message_id, pinned, at).await?;
        self.with_attachments_opt(&mut conn, message).await
    }

    async fn mark_read(&self, message_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<ReadReceipt> {
        let mut conn = self.pool.acquire().await?;
        self.receipts.mark_read(&mut conn, message_id, user_id, at).await
    }

    async fn receipts_for(&self, message_ids: &[Uuid]) -> Result<Vec<ReadReceipt>> {
        let mut conn = self.pool.acquire().await?;
        self.receipts.find_for_messages(&mut conn, message_ids).await
    }

    async fn mark_conversation_read(&self, conversation_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        self.receipts.mark_conversation_read(&mut conn, conversation_id, user_id, at).await
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        self.messages.count_unread(&mut conn, conversation_id, user_id).await
    }
}
