use crate::adapters::ChatStore;
use crate::domain::conversation::Conversation;
use crate::domain::message::{Message, NewMessage};
use crate::domain::receipt::{MessageStatus, ReadReceipt, derive_status};
use crate::error::{AppError, Result};
use opentelemetry::{global, metrics::Counter};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    deliveries_recorded_total: Counter<u64>,
    receipts_marked_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("confide-server");
        Self {
            deliveries_recorded_total: meter
                .u64_counter("messaging_deliveries_recorded_total")
                .with_description("Total number of delivery receipts created")
                .build(),
            receipts_marked_total: meter
                .u64_counter("messaging_receipts_marked_read_total")
                .with_description("Total number of receipts marked as read")
                .build(),
        }
    }
}

/// Owns the per-recipient delivery and read state of messages.
#[derive(Clone, Debug)]
pub struct DeliveryTracker {
    store: Arc<dyn ChatStore>,
    metrics: Metrics,
}

impl DeliveryTracker {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store, metrics: Metrics::new() }
    }

    /// Stores `message` together with a delivered receipt for every participant
    /// except the sender. Nothing is written if any part fails.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the conversation, sender or reply target is gone.
    /// Returns `AppError::Database` if the write fails.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, message, conversation),
        fields(message_id = %message.id, conversation_id = %conversation.id)
    )]
    pub async fn record_delivery(&self, message: NewMessage, conversation: &Conversation) -> Result<Message> {
        let recipients = conversation.recipients_of(message.sender_id);
        let stored = self.store.create_message(message, &recipients).await?;
        self.metrics.deliveries_recorded_total.add(recipients.len() as u64, &[]);
        Ok(stored)
    }

    /// Marks `message` as read by `reader`. Repeated calls keep the first `read_at`.
    ///
    /// # Errors
    /// Returns `AppError::NotParticipant` if `reader` is the sender or not in the conversation.
    /// Returns `AppError::NotFound` if the message belongs to another conversation.
    #[tracing::instrument(
        err(level = "debug"),
        skip(self, message, conversation),
        fields(message_id = %message.id, reader = %reader)
    )]
    pub async fn mark_read(&self, message: &Message, conversation: &Conversation, reader: Uuid) -> Result<ReadReceipt> {
        if message.conversation_id != conversation.id {
            return Err(AppError::NotFound);
        }
        if message.sender_id == reader || !conversation.is_participant(reader) {
            return Err(AppError::NotParticipant);
        }

        let receipt = self.store.mark_read(message.id, reader, OffsetDateTime::now_utc()).await?;
        self.metrics.receipts_marked_total.add(1, &[]);
        Ok(receipt)
    }

    /// Status of `message` from `viewer`'s point of view.
    #[must_use]
    pub fn status_for(
        &self,
        message: &Message,
        conversation: &Conversation,
        receipts: &[ReadReceipt],
        viewer: Uuid,
    ) -> MessageStatus {
        derive_status(message, conversation, receipts, viewer)
    }

    /// # Errors
    /// Returns `AppError::Database` if the lookup fails.
    pub async fn receipts_for(&self, message_ids: &[Uuid]) -> Result<Vec<ReadReceipt>> {
        self.store.receipts_for(message_ids).await
    }

    /// Marks every message from the other participants as read.
    ///
    /// # Errors
    /// Returns `AppError::NotParticipant` if `user_id` is not in the conversation.
    #[tracing::instrument(err(level = "debug"), skip(self, conversation), fields(conversation_id = %conversation.id))]
    pub async fn mark_conversation_read(&self, conversation: &Conversation, user_id: Uuid) -> Result<u64> {
        if !conversation.is_participant(user_id) {
            return Err(AppError::NotParticipant);
        }
        let changed = self.store.mark_conversation_read(conversation.id, user_id, OffsetDateTime::now_utc()).await?;
        self.metrics.receipts_marked_total.add(changed, &[]);
        Ok(changed)
    }

    /// Messages from the other participants that `user_id` has not read yet.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the count fails.
    pub async fn unread_count(&self, conversation: &Conversation, user_id: Uuid) -> Result<i64> {
        self.store.unread_count(conversation.id, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryChatStore;
    use crate::domain::user::{Role, User};

    struct Fixture {
        store: Arc<MemoryChatStore>,
        tracker: DeliveryTracker,
        alice: User,
        bob: User,
        conversation: Conversation,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryChatStore::new());
        let alice = User::new("alice", Role::User);
        let bob = User::new("bob", Role::Admin);
        store.insert_user(alice.clone()).unwrap();
        store.insert_user(bob.clone()).unwrap();
        let conversation = store
            .create_conversation(Uuid::now_v7(), &[alice.id, bob.id], None, OffsetDateTime::now_utc())
            .await
            .unwrap();
        let tracker = DeliveryTracker::new(store.clone());
        Fixture { store, tracker, alice, bob, conversation }
    }

    fn draft(f: &Fixture) -> NewMessage {
        NewMessage {
            id: Uuid::now_v7(),
            conversation_id: f.conversation.id,
            sender_id: f.alice.id,
            content: Some("hello".into()),
            reply_to_id: None,
            attachments: vec![],
            created_at: OffsetDateTime::now_utc(),
        }
    }

    async fn send(f: &Fixture) -> Message {
        f.tracker.record_delivery(draft(f), &f.conversation).await.unwrap()
    }

    #[tokio::test]
    async fn test_delivery_creates_unread_receipt_per_recipient() {
        let f = fixture().await;
        let msg = send(&f).await;

        let receipts = f.tracker.receipts_for(&[msg.id]).await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].user_id, f.bob.id);
        assert!(receipts[0].read_at.is_none());
        assert_eq!(f.tracker.status_for(&msg, &f.conversation, &receipts, f.alice.id), MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent_and_yields_seen() {
        let f = fixture().await;
        let msg = send(&f).await;

        let first = f.tracker.mark_read(&msg, &f.conversation, f.bob.id).await.unwrap();
        let second = f.tracker.mark_read(&msg, &f.conversation, f.bob.id).await.unwrap();
        assert_eq!(first.read_at, second.read_at);

        let receipts = f.tracker.receipts_for(&[msg.id]).await.unwrap();
        assert_eq!(f.tracker.status_for(&msg, &f.conversation, &receipts, f.alice.id), MessageStatus::Seen);
        assert_eq!(f.tracker.status_for(&msg, &f.conversation, &receipts, f.bob.id), MessageStatus::Received);
    }

    #[tokio::test]
    async fn test_read_without_delivery_row_creates_receipt() {
        let f = fixture().await;
        let msg = f.store.create_message(draft(&f), &[]).await.unwrap();

        f.tracker.mark_read(&msg, &f.conversation, f.bob.id).await.unwrap();

        let receipts = f.tracker.receipts_for(&[msg.id]).await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert!(receipts[0].read_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_delivery_stores_no_message() {
        let f = fixture().await;
        let mut message = draft(&f);
        message.conversation_id = Uuid::new_v4();

        assert!(matches!(f.tracker.record_delivery(message, &f.conversation).await, Err(AppError::NotFound)));
        assert!(f.store.list_messages(f.conversation.id, f.alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sender_and_outsiders_cannot_mark_read() {
        let f = fixture().await;
        let msg = send(&f).await;

        assert!(matches!(f.tracker.mark_read(&msg, &f.conversation, f.alice.id).await, Err(AppError::NotParticipant)));
        assert!(matches!(
            f.tracker.mark_read(&msg, &f.conversation, Uuid::new_v4()).await,
            Err(AppError::NotParticipant)
        ));
    }

    #[tokio::test]
    async fn test_unread_count_follows_conversation_read() {
        let f = fixture().await;
        send(&f).await;
        send(&f).await;

        assert_eq!(f.tracker.unread_count(&f.conversation, f.bob.id).await.unwrap(), 2);
        assert_eq!(f.tracker.unread_count(&f.conversation, f.alice.id).await.unwrap(), 0);

        f.tracker.mark_conversation_read(&f.conversation, f.bob.id).await.unwrap();
        assert_eq!(f.tracker.unread_count(&f.conversation, f.bob.id).await.unwrap(), 0);
    }
}
