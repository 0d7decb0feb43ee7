use crate::domain::message::Message;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRecord {
    pub(crate) id: Uuid,
    pub(crate) conversation_id: Uuid,
    pub(crate) sender_id: Uuid,
    pub(crate) content: Option<String>,
    pub(crate) reply_to_id: Option<Uuid>,
    pub(crate) is_edited: bool,
    pub(crate) is_pinned: bool,
    pub(crate) is_deleted: bool,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
    pub(crate) edited_at: Option<OffsetDateTime>,
}

/// Attachments are stored separately and start out empty.
impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            conversation_id: record.conversation_id,
            sender_id: record.sender_id,
            content: record.content,
            reply_to_id: record.reply_to_id,
            edited: record.is_edited,
            pinned: record.is_pinned,
            deleted: record.is_deleted,
            created_at: record.created_at,
            updated_at: record.updated_at,
            edited_at: record.edited_at,
            attachments: Vec::new(),
        }
    }
}
