use crate::adapters::database::records::AttachmentRecord;
use crate::domain::attachment::Attachment;
use crate::error::Result;
use sqlx::PgConnection;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct AttachmentRepository {}

impl AttachmentRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Records the attachments of a message.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the insert fails.
    #[tracing::instrument(level = "debug", skip(self, conn, attachments), fields(count = attachments.len()))]
    pub(crate) async fn create_batch(&self, conn: &mut PgConnection, attachments: &[Attachment]) -> Result<()> {
        for attachment in attachments {
            sqlx::query(
                r#"
                INSERT INTO message_attachments
                    (id, message_id, file, file_type, file_name, file_size, mime_type, uploaded_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(attachment.id)
            .bind(attachment.message_id)
            .bind(&attachment.file)
            .bind(attachment.kind.as_str())
            .bind(&attachment.file_name)
            .bind(attachment.file_size)
            .bind(&attachment.mime_type)
            .bind(attachment.uploaded_at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Fetches the attachments of several messages at once.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn, message_ids), fields(count = message_ids.len()))]
    pub(crate) async fn find_for_messages(&self, conn: &mut PgConnection, message_ids: &[Uuid]) -> Result<Vec<Attachment>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, AttachmentRecord>(
            r#"
            SELECT id, message_id, file, file_type, file_name, file_size, mime_type, uploaded_at
            FROM message_attachments
            WHERE message_id = ANY($1)
            ORDER BY uploaded_at ASC, id ASC
            "#,
        )
        .bind(message_ids)
        .fetch_all(conn)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }
}
