use crate::domain::conversation::Conversation;
use crate::domain::message::Message;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Delivery and read state of one message for one recipient. `read_at` is set at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub delivered_at: OffsetDateTime,
    pub read_at: Option<OffsetDateTime>,
}

impl ReadReceipt {
    #[must_use]
    pub const fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
    Received,
}

/// Derives the status of `message` as seen by `viewer`.
///
/// Only participants who had joined when the message was created count towards
/// `Seen`; later joiners never received a receipt for it.
#[must_use]
pub fn derive_status(
    message: &Message,
    conversation: &Conversation,
    receipts: &[ReadReceipt],
    viewer: Uuid,
) -> MessageStatus {
    if message.sender_id != viewer {
        return MessageStatus::Received;
    }

    let audience = conversation.audience_at(message.sender_id, message.created_at);
    let receipt_of = |user_id: Uuid| receipts.iter().find(|r| r.message_id == message.id && r.user_id == user_id);

    if audience.iter().all(|user_id| receipt_of(*user_id).is_some_and(ReadReceipt::is_read)) {
        return MessageStatus::Seen;
    }

    if audience.iter().any(|user_id| receipt_of(*user_id).is_some()) {
        MessageStatus::Delivered
    } else {
        MessageStatus::Sent
    }
}
