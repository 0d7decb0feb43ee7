use crate::domain::conversation::{Conversation, Participant};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct ConversationRecord {
    pub(crate) id: Uuid,
    pub(crate) community_id: Option<Uuid>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
    pub(crate) last_message_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ParticipantRecord {
    pub(crate) conversation_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) joined_at: OffsetDateTime,
}

impl From<&ParticipantRecord> for Participant {
    fn from(record: &ParticipantRecord) -> Self {
        Self { user_id: record.user_id, joined_at: record.joined_at }
    }
}

impl ConversationRecord {
    /// Joins the row with the participant rows belonging to it.
    pub(crate) fn into_conversation(self, participants: &[ParticipantRecord]) -> Conversation {
        Conversation {
            id: self.id,
            participants: participants.iter().filter(|p| p.conversation_id == self.id).map(Into::into).collect(),
            community_id: self.community_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_message_at: self.last_message_at,
        }
    }
}
