use uuid::Uuid;

/// A confession channel. Conversations opened in its context are moderated by
/// its designated moderator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Community {
    pub id: Uuid,
    pub name: String,
    pub moderator_id: Uuid,
}

impl Community {
    #[must_use]
    pub fn new(name: impl Into<String>, moderator_id: Uuid) -> Self {
        Self { id: Uuid::now_v7(), name: name.into(), moderator_id }
    }
}
