use crate::protocol::UserSummary;
use crate::services::conversation_service::ConversationOverview;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct OpenConversationRequest {
    pub target_user_id: Uuid,
    pub community_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct LastMessagePreview {
    pub id: Uuid,
    pub sender: Option<String>,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub participants: Vec<UserSummary>,
    pub community_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    pub unread_count: i64,
    pub last_message: Option<LastMessagePreview>,
}

impl From<ConversationOverview> for ConversationResponse {
    fn from(overview: ConversationOverview) -> Self {
        let ConversationOverview { conversation, participants, unread_count, last_message, last_message_sender } =
            overview;
        Self {
            id: conversation.id,
            participants: participants.iter().map(UserSummary::from).collect(),
            community_id: conversation.community_id,
            created_at: conversation.created_at,
            last_message_at: conversation.last_message_at,
            unread_count,
            last_message: last_message.map(|m| LastMessagePreview {
                id: m.id,
                sender: last_message_sender,
                content: m.preview(),
                created_at: m.created_at,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub status: &'static str,
    pub marked: u64,
}
