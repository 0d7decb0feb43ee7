use crate::domain::community::Community;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct CommunityRecord {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) moderator_id: Uuid,
}

impl From<CommunityRecord> for Community {
    fn from(record: CommunityRecord) -> Self {
        Self { id: record.id, name: record.name, moderator_id: record.moderator_id }
    }
}
