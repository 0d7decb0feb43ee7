use crate::error::{AppError, Result};
use std::collections::HashSet;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub user_id: Uuid,
    pub joined_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<Participant>,
    pub community_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub last_message_at: Option<OffsetDateTime>,
}

impl Conversation {
    #[must_use]
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.participants.iter().map(|p| p.user_id)
    }

    /// Everyone currently in the conversation except `sender`.
    #[must_use]
    pub fn recipients_of(&self, sender: Uuid) -> Vec<Uuid> {
        self.participant_ids().filter(|id| *id != sender).collect()
    }

    /// Participants other than `sender` who had already joined at `at`.
    #[must_use]
    pub fn audience_at(&self, sender: Uuid, at: OffsetDateTime) -> Vec<Uuid> {
        self.participants.iter().filter(|p| p.user_id != sender && p.joined_at <= at).map(|p| p.user_id).collect()
    }
}

/// A conversation needs at least two distinct participants.
///
/// # Errors
/// Returns `AppError::ValidationFailed` for fewer than two or duplicated ids.
pub fn validate_participants(ids: &[Uuid]) -> Result<()> {
    if ids.len() < 2 {
        return Err(AppError::ValidationFailed("A conversation needs at least two participants".into()));
    }
    let unique: HashSet<_> = ids.iter().collect();
    if unique.len() != ids.len() {
        return Err(AppError::ValidationFailed("Duplicate conversation participant".into()));
    }
    Ok(())
}
