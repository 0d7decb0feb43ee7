use crate::domain::attachment::{Attachment, NewAttachment};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Lifecycle of a single message. `Deleted` is terminal; pinning is orthogonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Active,
    Edited,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub edited: bool,
    pub pinned: bool,
    pub deleted: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub edited_at: Option<OffsetDateTime>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    #[must_use]
    pub const fn state(&self) -> MessageState {
        if self.deleted {
            MessageState::Deleted
        } else if self.edited {
            MessageState::Edited
        } else {
            MessageState::Active
        }
    }

    /// The window is inclusive: a message exactly `window` old is still editable.
    #[must_use]
    pub fn is_within_edit_window(&self, now: OffsetDateTime, window: Duration) -> bool {
        now - self.created_at <= window
    }

    #[must_use]
    pub fn is_editable_at(&self, now: OffsetDateTime, window: Duration) -> bool {
        self.state() != MessageState::Deleted && self.is_within_edit_window(now, window)
    }

    /// Short form used in conversation listings.
    #[must_use]
    pub fn preview(&self) -> String {
        match self.content.as_deref() {
            Some(content) if !content.is_empty() => {
                if content.chars().count() > 50 {
                    let head: String = content.chars().take(50).collect();
                    format!("{head}...")
                } else {
                    content.to_string()
                }
            }
            _ => "[Attachment]".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub attachments: Vec<NewAttachment>,
    pub created_at: OffsetDateTime,
}

impl NewMessage {
    #[must_use]
    pub fn into_message(self) -> Message {
        let Self { id, conversation_id, sender_id, content, reply_to_id, attachments, created_at } = self;
        Message {
            id,
            conversation_id,
            sender_id,
            content,
            reply_to_id,
            edited: false,
            pinned: false,
            deleted: false,
            created_at,
            updated_at: created_at,
            edited_at: None,
            attachments: attachments.into_iter().map(|a| a.into_attachment(id, created_at)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_at(created_at: OffsetDateTime) -> Message {
        NewMessage {
            id: Uuid::now_v7(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: Some("hello".into()),
            reply_to_id: None,
            attachments: vec![],
            created_at,
        }
        .into_message()
    }

    #[test]
    fn test_edit_window_is_inclusive() {
        let now = OffsetDateTime::now_utc();
        let window = Duration::minutes(10);

        assert!(message_at(now - Duration::minutes(10)).is_editable_at(now, window));
        assert!(!message_at(now - Duration::minutes(11)).is_editable_at(now, window));
    }

    #[test]
    fn test_deleted_is_never_editable() {
        let now = OffsetDateTime::now_utc();
        let mut msg = message_at(now);
        msg.deleted = true;

        assert!(!msg.is_editable_at(now, Duration::minutes(10)));
        assert_eq!(msg.state(), MessageState::Deleted);
    }

    #[test]
    fn test_preview_truncates_and_marks_attachments() {
        let now = OffsetDateTime::now_utc();
        let mut msg = message_at(now);
        msg.content = Some("x".repeat(60));
        assert_eq!(msg.preview(), format!("{}...", "x".repeat(50)));

        msg.content = None;
        assert_eq!(msg.preview(), "[Attachment]");
    }
}
