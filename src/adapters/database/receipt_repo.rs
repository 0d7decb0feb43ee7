use crate::adapters::database::records::ReadReceiptRecord;
use crate::domain::receipt::ReadReceipt;
use crate::error::Result;
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct ReceiptRepository {}

impl ReceiptRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Creates a delivered receipt per recipient. Existing receipts are left untouched.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the insert fails.
    #[tracing::instrument(level = "debug", skip(self, conn, recipients), fields(count = recipients.len()))]
    pub(crate) async fn record_deliveries(
        &self,
        conn: &mut PgConnection,
        message_id: Uuid,
        recipients: &[Uuid],
        at: OffsetDateTime,
    ) -> Result<u64> {
        if recipients.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO read_receipts (message_id, user_id, delivered_at)
            SELECT $1, user_id, $3 FROM UNNEST($2::uuid[]) AS t(user_id)
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(recipients)
        .bind(at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Upserts a receipt as read. A `read_at` that is already set is preserved.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the upsert fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn mark_read(
        &self,
        conn: &mut PgConnection,
        message_id: Uuid,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<ReadReceipt> {
        let record = sqlx::query_as::<_, ReadReceiptRecord>(
            r#"
            INSERT INTO read_receipts (message_id, user_id, delivered_at, read_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (message_id, user_id)
            DO UPDATE SET read_at = COALESCE(read_receipts.read_at, EXCLUDED.read_at)
            RETURNING message_id, user_id, delivered_at, read_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(at)
        .fetch_one(conn)
        .await?;

        Ok(record.into())
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn, message_ids), fields(count = message_ids.len()))]
    pub(crate) async fn find_for_messages(&self, conn: &mut PgConnection, message_ids: &[Uuid]) -> Result<Vec<ReadReceipt>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ReadReceiptRecord>(
            r#"
            SELECT message_id, user_id, delivered_at, read_at
            FROM read_receipts
            WHERE message_id = ANY($1)
            ORDER BY delivered_at ASC, user_id ASC
            "#,
        )
        .bind(message_ids)
        .fetch_all(conn)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    /// Marks every message in the conversation not sent by `user_id` as read.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the upsert fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn mark_conversation_read(
        &self,
        conn: &mut PgConnection,
        conversation_id: Uuid,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO read_receipts (message_id, user_id, delivered_at, read_at)
            SELECT m.id, $2, $3, $3
            FROM messages m
            WHERE m.conversation_id = $1 AND m.sender_id <> $2 AND NOT m.is_deleted
            ON CONFLICT (message_id, user_id)
            DO UPDATE SET read_at = EXCLUDED.read_at
            WHERE read_receipts.read_at IS NULL
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }
}
