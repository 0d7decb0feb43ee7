use crate::adapters::database::conversation_repo::map_fk_violation;
use crate::adapters::database::records::MessageRecord;
use crate::domain::message::{Message, NewMessage};
use crate::error::Result;
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct MessageRepository {}

impl MessageRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Records a new message. Attachments are written by `AttachmentRepository`.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the conversation, sender or replied-to message does not exist.
    /// Returns `AppError::Database` if the insert fails.
    #[tracing::instrument(level = "debug", skip(self, conn, message), fields(message_id = %message.id))]
    pub(crate) async fn create(&self, conn: &mut PgConnection, message: &NewMessage) -> Result<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, reply_to_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING id, conversation_id, sender_id, content, reply_to_id, is_edited, is_pinned, is_deleted,
                      created_at, updated_at, edited_at
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.content.as_deref())
        .bind(message.reply_to_id)
        .bind(message.created_at)
        .fetch_one(conn)
        .await
        .map_err(map_fk_violation)?;

        Ok(record.into())
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn find_by_id(&self, conn: &mut PgConnection, id: Uuid) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, content, reply_to_id, is_edited, is_pinned, is_deleted,
                   created_at, updated_at, edited_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(record.map(Into::into))
    }

    /// Lists a conversation in creation order, hiding deleted messages from everyone but their sender.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn list_for_viewer(
        &self,
        conn: &mut PgConnection,
        conversation_id: Uuid,
        viewer: Uuid,
    ) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, content, reply_to_id, is_edited, is_pinned, is_deleted,
                   created_at, updated_at, edited_at
            FROM messages
            WHERE conversation_id = $1
              AND (NOT is_deleted OR sender_id = $2)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(conversation_id)
        .bind(viewer)
        .fetch_all(conn)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn find_last_visible(&self, conn: &mut PgConnection, conversation_id: Uuid) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, content, reply_to_id, is_edited, is_pinned, is_deleted,
                   created_at, updated_at, edited_at
            FROM messages
            WHERE conversation_id = $1 AND NOT is_deleted
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(conn)
        .await?;

        Ok(record.map(Into::into))
    }

    /// Replaces the content of a live message still inside its edit window.
    ///
    /// Returns `None` when the message is missing, deleted, too old or not sent by `sender_id`.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the update fails.
    #[tracing::instrument(level = "debug", skip(self, conn, content))]
    pub(crate) async fn update_content(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        sender_id: Uuid,
        content: &str,
        at: OffsetDateTime,
        editable_since: OffsetDateTime,
    ) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            UPDATE messages
            SET content = $3, is_edited = TRUE, edited_at = $4, updated_at = $4
            WHERE id = $1
              AND sender_id = $2
              AND NOT is_deleted
              AND created_at >= $5
            RETURNING id, conversation_id, sender_id, content, reply_to_id, is_edited, is_pinned, is_deleted,
                      created_at, updated_at, edited_at
            "#,
        )
        .bind(id)
        .bind(sender_id)
        .bind(content)
        .bind(at)
        .bind(editable_since)
        .fetch_optional(conn)
        .await?;

        Ok(record.map(Into::into))
    }

    /// Flags a live message as deleted. Returns `None` if it was already deleted.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the update fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn soft_delete(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        sender_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            UPDATE messages
            SET is_deleted = TRUE, updated_at = $3
            WHERE id = $1 AND sender_id = $2 AND NOT is_deleted
            RETURNING id, conversation_id, sender_id, content, reply_to_id, is_edited, is_pinned, is_deleted,
                      created_at, updated_at, edited_at
            "#,
        )
        .bind(id)
        .bind(sender_id)
        .bind(at)
        .fetch_optional(conn)
        .await?;

        Ok(record.map(Into::into))
    }

    /// # Errors
    /// Returns `AppError::Database` if the update fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn set_pinned(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        pinned: bool,
        at: OffsetDateTime,
    ) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            UPDATE messages
            SET is_pinned = $2, updated_at = $3
            WHERE id = $1 AND NOT is_deleted
            RETURNING id, conversation_id, sender_id, content, reply_to_id, is_edited, is_pinned, is_deleted,
                      created_at, updated_at, edited_at
            "#,
        )
        .bind(id)
        .bind(pinned)
        .bind(at)
        .fetch_optional(conn)
        .await?;

        Ok(record.map(Into::into))
    }

    /// Counts live messages from other participants that `user_id` has not read.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn count_unread(&self, conn: &mut PgConnection, conversation_id: Uuid, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM messages m
            WHERE m.conversation_id = $1
              AND m.sender_id <> $2
              AND NOT m.is_deleted
              AND NOT EXISTS (
                  SELECT 1 FROM read_receipts r
                  WHERE r.message_id = m.id AND r.user_id = $2 AND r.read_at IS NOT NULL
              )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(conn)
        .await?;

        Ok(count)
    }
}
