use crate::domain::attachment::{Attachment, AttachmentKind};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct AttachmentRecord {
    pub(crate) id: Uuid,
    pub(crate) message_id: Uuid,
    pub(crate) file: String,
    pub(crate) file_type: String,
    pub(crate) file_name: String,
    pub(crate) file_size: i64,
    pub(crate) mime_type: String,
    pub(crate) uploaded_at: OffsetDateTime,
}

impl From<AttachmentRecord> for Attachment {
    fn from(record: AttachmentRecord) -> Self {
        let kind =
            record.file_type.parse().unwrap_or_else(|_| AttachmentKind::classify(&record.mime_type));
        Self {
            id: record.id,
            message_id: record.message_id,
            file: record.file,
            kind,
            file_name: record.file_name,
            file_size: record.file_size,
            mime_type: record.mime_type,
            uploaded_at: record.uploaded_at,
        }
    }
}
