use crate::domain::receipt::ReadReceipt;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct ReadReceiptRecord {
    pub(crate) message_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) delivered_at: OffsetDateTime,
    pub(crate) read_at: Option<OffsetDateTime>,
}

impl From<ReadReceiptRecord> for ReadReceipt {
    fn from(record: ReadReceiptRecord) -> Self {
        Self {
            message_id: record.message_id,
            user_id: record.user_id,
            delivered_at: record.delivered_at,
            read_at: record.read_at,
        }
    }
}
