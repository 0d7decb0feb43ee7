use crate::adapters::ChatStore;
use crate::domain::community::Community;
use crate::domain::conversation::{Conversation, Participant};
use crate::domain::message::{Message, NewMessage};
use crate::domain::receipt::ReadReceipt;
use crate::domain::user::User;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    communities: HashMap<Uuid, Community>,
    subscriptions: HashSet<(Uuid, Uuid)>,
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Message>,
    receipts: HashMap<(Uuid, Uuid), ReadReceipt>,
    direct: HashMap<DirectKey, Uuid>,
}

/// Unordered participant pair plus community context of a two-party conversation.
type DirectKey = (Uuid, Uuid, Option<Uuid>);

fn direct_key(first: Uuid, second: Uuid, community_id: Option<Uuid>) -> DirectKey {
    if first <= second { (first, second, community_id) } else { (second, first, community_id) }
}

impl MemoryState {
    fn insert_conversation(
        &mut self,
        conversation_id: Uuid,
        participants: &[Uuid],
        community_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<Conversation> {
        if participants.iter().any(|id| !self.users.contains_key(id)) {
            return Err(AppError::NotFound);
        }
        if community_id.is_some_and(|id| !self.communities.contains_key(&id)) {
            return Err(AppError::NotFound);
        }

        let conversation = Conversation {
            id: conversation_id,
            participants: participants.iter().map(|user_id| Participant { user_id: *user_id, joined_at: at }).collect(),
            community_id,
            created_at: at,
            updated_at: at,
            last_message_at: None,
        };
        self.conversations.insert(conversation_id, conversation.clone());
        Ok(conversation)
    }

    fn conversation_messages(&self, conversation_id: Uuid) -> Vec<&Message> {
        let mut messages: Vec<&Message> =
            self.messages.values().filter(|m| m.conversation_id == conversation_id).collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        messages
    }
}

/// In-process [`ChatStore`] used when no database is configured, and in tests.
///
/// Every operation takes the single state lock, so each one is atomic.
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    state: RwLock<MemoryState>,
}

impl MemoryChatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|_| {
            tracing::error!("Memory store lock poisoned");
            AppError::Internal
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|_| {
            tracing::error!("Memory store lock poisoned");
            AppError::Internal
        })
    }

    /// # Errors
    /// Returns `AppError::ValidationFailed` if the username is taken.
    pub fn insert_user(&self, user: User) -> Result<()> {
        let mut state = self.write()?;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(AppError::ValidationFailed("Username already exists".into()));
        }
        state.users.insert(user.id, user);
        Ok(())
    }

    /// # Errors
    /// Returns `AppError::NotFound` if the moderator does not exist.
    pub fn insert_community(&self, community: Community) -> Result<()> {
        let mut state = self.write()?;
        if !state.users.contains_key(&community.moderator_id) {
            return Err(AppError::NotFound);
        }
        state.communities.insert(community.id, community);
        Ok(())
    }

    /// # Errors
    /// Returns `AppError::NotFound` if the community or user does not exist.
    pub fn subscribe(&self, community_id: Uuid, user_id: Uuid) -> Result<()> {
        let mut state = self.write()?;
        if !state.communities.contains_key(&community_id) || !state.users.contains_key(&user_id) {
            return Err(AppError::NotFound);
        }
        state.subscriptions.insert((community_id, user_id));
        Ok(())
    }

    /// Moves a message's creation time into the past.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the message does not exist.
    pub fn backdate_message(&self, message_id: Uuid, by: Duration) -> Result<()> {
        let mut state = self.write()?;
        let message = state.messages.get_mut(&message_id).ok_or(AppError::NotFound)?;
        message.created_at -= by;
        message.updated_at -= by;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn ping(&self) -> Result<()> {
        self.read().map(|_| ())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }

    async fn find_users(&self, user_ids: &[Uuid]) -> Result<Vec<User>> {
        let state = self.read()?;
        Ok(user_ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }

    async fn find_community(&self, community_id: Uuid) -> Result<Option<Community>> {
        Ok(self.read()?.communities.get(&community_id).cloned())
    }

    async fn is_subscribed(&self, community_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self.read()?.subscriptions.contains(&(community_id, user_id)))
    }

    async fn find_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.read()?.conversations.get(&conversation_id).cloned())
    }

    async fn open_direct_conversation(
        &self,
        conversation_id: Uuid,
        first: Uuid,
        second: Uuid,
        community_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<(Conversation, bool)> {
        let mut state = self.write()?;
        let key = direct_key(first, second, community_id);
        if let Some(existing) = state.direct.get(&key).and_then(|id| state.conversations.get(id)) {
            return Ok((existing.clone(), false));
        }

        let conversation = state.insert_conversation(conversation_id, &[first, second], community_id, at)?;
        state.direct.insert(key, conversation_id);
        Ok((conversation, true))
    }

    async fn create_conversation(
        &self,
        conversation_id: Uuid,
        participants: &[Uuid],
        community_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<Conversation> {
        self.write()?.insert_conversation(conversation_id, participants, community_id, at)
    }

    async fn add_participant(&self, conversation_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<Conversation> {
        let mut state = self.write()?;
        if !state.users.contains_key(&user_id) {
            return Err(AppError::NotFound);
        }
        let conversation = state.conversations.get_mut(&conversation_id).ok_or(AppError::NotFound)?;
        if conversation.is_participant(user_id) {
            return Err(AppError::ValidationFailed("User is already a participant".into()));
        }
        conversation.participants.push(Participant { user_id, joined_at: at });
        conversation.updated_at = at;
        Ok(conversation.clone())
    }

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let state = self.read()?;
        let mut conversations: Vec<Conversation> =
            state.conversations.values().filter(|c| c.is_participant(user_id)).cloned().collect();
        // Most recent activity first; conversations without messages go last.
        conversations.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(conversations)
    }

    async fn create_message(&self, message: NewMessage, recipients: &[Uuid]) -> Result<Message> {
        let mut state = self.write()?;
        if !state.users.contains_key(&message.sender_id) {
            return Err(AppError::NotFound);
        }
        if message.reply_to_id.is_some_and(|id| !state.messages.contains_key(&id)) {
            return Err(AppError::NotFound);
        }
        if recipients.iter().any(|id| !state.users.contains_key(id)) {
            return Err(AppError::NotFound);
        }
        let conversation = state.conversations.get_mut(&message.conversation_id).ok_or(AppError::NotFound)?;
        conversation.last_message_at = Some(message.created_at);
        conversation.updated_at = message.created_at;

        let message = message.into_message();
        for user_id in recipients {
            state.receipts.entry((message.id, *user_id)).or_insert(ReadReceipt {
                message_id: message.id,
                user_id: *user_id,
                delivered_at: message.created_at,
                read_at: None,
            });
        }
        state.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        Ok(self.read()?.messages.get(&message_id).cloned())
    }

    async fn list_messages(&self, conversation_id: Uuid, viewer: Uuid) -> Result<Vec<Message>> {
        let state = self.read()?;
        Ok(state
            .conversation_messages(conversation_id)
            .into_iter()
            .filter(|m| !m.deleted || m.sender_id == viewer)
            .cloned()
            .collect())
    }

    async fn last_visible_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        let state = self.read()?;
        Ok(state.conversation_messages(conversation_id).into_iter().rev().find(|m| !m.deleted).cloned())
    }

    async fn edit_message(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        content: &str,
        at: OffsetDateTime,
        editable_since: OffsetDateTime,
    ) -> Result<Option<Message>> {
        let mut state = self.write()?;
        let Some(message) = state.messages.get_mut(&message_id) else {
            return Ok(None);
        };
        if message.sender_id != sender_id || message.deleted || message.created_at < editable_since {
            return Ok(None);
        }
        message.content = Some(content.to_string());
        message.edited = true;
        message.edited_at = Some(at);
        message.updated_at = at;
        Ok(Some(message.clone()))
    }

    async fn soft_delete_message(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Message>> {
        let mut state = self.write()?;
        let Some(message) = state.messages.get_mut(&message_id) else {
            return Ok(None);
        };
        if message.sender_id != sender_id || message.deleted {
            return Ok(None);
        }
        message.deleted = true;
        message.updated_at = at;
        Ok(Some(message.clone()))
    }

    async fn set_pinned(&self, message_id: Uuid, pinned: bool, at: OffsetDateTime) -> Result<Option<Message>> {
        let mut state = self.write()?;
        let Some(message) = state.messages.get_mut(&message_id) else {
            return Ok(None);
        };
        if message.deleted {
            return Ok(None);
        }
        message.pinned = pinned;
        message.updated_at = at;
        Ok(Some(message.clone()))
    }

    async fn mark_read(&self, message_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<ReadReceipt> {
        let mut state = self.write()?;
        if !state.messages.contains_key(&message_id) {
            return Err(AppError::NotFound);
        }
        let receipt = state.receipts.entry((message_id, user_id)).or_insert(ReadReceipt {
            message_id,
            user_id,
            delivered_at: at,
            read_at: None,
        });
        receipt.read_at.get_or_insert(at);
        Ok(*receipt)
    }

    async fn receipts_for(&self, message_ids: &[Uuid]) -> Result<Vec<ReadReceipt>> {
        let state = self.read()?;
        let wanted: HashSet<&Uuid> = message_ids.iter().collect();
        let mut receipts: Vec<ReadReceipt> =
            state.receipts.values().filter(|r| wanted.contains(&r.message_id)).copied().collect();
        receipts.sort_by_key(|r| (r.delivered_at, r.user_id));
        Ok(receipts)
    }

    async fn mark_conversation_read(&self, conversation_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<u64> {
        let mut state = self.write()?;
        let unread: Vec<Uuid> = state
            .conversation_messages(conversation_id)
            .into_iter()
            .filter(|m| m.sender_id != user_id && !m.deleted)
            .map(|m| m.id)
            .collect();

        let mut changed = 0;
        for message_id in unread {
            let receipt = state.receipts.entry((message_id, user_id)).or_insert(ReadReceipt {
                message_id,
                user_id,
                delivered_at: at,
                read_at: None,
            });
            if receipt.read_at.is_none() {
                receipt.read_at = Some(at);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> Result<i64> {
        let state = self.read()?;
        let count = state
            .conversation_messages(conversation_id)
            .into_iter()
            .filter(|m| m.sender_id != user_id && !m.deleted)
            .filter(|m| !state.receipts.get(&(m.id, user_id)).is_some_and(ReadReceipt::is_read))
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::user::Role;

    struct Fixture {
        store: MemoryChatStore,
        alice: User,
        bob: User,
        conversation: Conversation,
    }

    async fn fixture() -> Fixture {
        let store = MemoryChatStore::new();
        let alice = User::new("alice", Role::User);
        let bob = User::new("bob", Role::Admin);
        store.insert_user(alice.clone()).unwrap();
        store.insert_user(bob.clone()).unwrap();
        let conversation = store
            .create_conversation(Uuid::now_v7(), &[alice.id, bob.id], None, OffsetDateTime::now_utc())
            .await
            .unwrap();
        Fixture { store, alice, bob, conversation }
    }

    fn new_message(conversation_id: Uuid, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            content: Some(content.into()),
            reply_to_id: None,
            attachments: vec![],
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_mark_read_keeps_first_timestamp() {
        let f = fixture().await;
        let msg = f.store.create_message(new_message(f.conversation.id, f.alice.id, "hi"), &[f.bob.id]).await.unwrap();

        let first = OffsetDateTime::now_utc();
        let receipt = f.store.mark_read(msg.id, f.bob.id, first).await.unwrap();
        assert_eq!(receipt.read_at, Some(first));

        let again = f.store.mark_read(msg.id, f.bob.id, first + Duration::seconds(30)).await.unwrap();
        assert_eq!(again.read_at, Some(first));
    }

    #[tokio::test]
    async fn test_create_message_records_each_delivery_once() {
        let f = fixture().await;
        let msg = f
            .store
            .create_message(new_message(f.conversation.id, f.alice.id, "hi"), &[f.bob.id, f.bob.id])
            .await
            .unwrap();

        let receipts = f.store.receipts_for(&[msg.id]).await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].delivered_at, msg.created_at);
        assert!(receipts[0].read_at.is_none());
    }

    #[tokio::test]
    async fn test_conditional_updates_refuse_deleted_messages() {
        let f = fixture().await;
        let msg = f.store.create_message(new_message(f.conversation.id, f.alice.id, "hi"), &[f.bob.id]).await.unwrap();
        let now = OffsetDateTime::now_utc();

        assert!(f.store.soft_delete_message(msg.id, f.alice.id, now).await.unwrap().is_some());
        assert!(f.store.soft_delete_message(msg.id, f.alice.id, now).await.unwrap().is_none());
        assert!(f.store.edit_message(msg.id, f.alice.id, "x", now, now - Duration::minutes(10)).await.unwrap().is_none());
        assert!(f.store.set_pinned(msg.id, true, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_messages_only_visible_to_sender() {
        let f = fixture().await;
        let msg = f.store.create_message(new_message(f.conversation.id, f.alice.id, "oops"), &[f.bob.id]).await.unwrap();
        f.store.soft_delete_message(msg.id, f.alice.id, OffsetDateTime::now_utc()).await.unwrap();

        assert_eq!(f.store.list_messages(f.conversation.id, f.alice.id).await.unwrap().len(), 1);
        assert!(f.store.list_messages(f.conversation.id, f.bob.id).await.unwrap().is_empty());
        assert!(f.store.last_visible_message(f.conversation.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unread_count_and_mark_conversation_read() {
        let f = fixture().await;
        for text in ["one", "two"] {
            f.store.create_message(new_message(f.conversation.id, f.alice.id, text), &[f.bob.id]).await.unwrap();
        }
        f.store.create_message(new_message(f.conversation.id, f.bob.id, "mine"), &[f.alice.id]).await.unwrap();

        assert_eq!(f.store.unread_count(f.conversation.id, f.bob.id).await.unwrap(), 2);
        assert_eq!(f.store.mark_conversation_read(f.conversation.id, f.bob.id, OffsetDateTime::now_utc()).await.unwrap(), 2);
        assert_eq!(f.store.unread_count(f.conversation.id, f.bob.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_participant_twice_fails() {
        let f = fixture().await;
        let carol = User::new("carol", Role::User);
        f.store.insert_user(carol.clone()).unwrap();
        let now = OffsetDateTime::now_utc();

        let updated = f.store.add_participant(f.conversation.id, carol.id, now).await.unwrap();
        assert!(updated.is_participant(carol.id));
        assert!(matches!(
            f.store.add_participant(f.conversation.id, carol.id, now).await,
            Err(AppError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_create_message_writes_nothing() {
        let f = fixture().await;
        let stranger = Uuid::new_v4();

        let err = f
            .store
            .create_message(new_message(f.conversation.id, f.alice.id, "hi"), &[f.bob.id, stranger])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));

        assert!(f.store.list_messages(f.conversation.id, f.alice.id).await.unwrap().is_empty());
        let conversation = f.store.find_conversation(f.conversation.id).await.unwrap().unwrap();
        assert!(conversation.last_message_at.is_none());
        assert!(f.store.read().unwrap().receipts.is_empty());
    }

    #[tokio::test]
    async fn test_open_direct_conversation_is_keyed_on_unordered_pair() {
        let f = fixture().await;
        let now = OffsetDateTime::now_utc();

        let (first, created) =
            f.store.open_direct_conversation(Uuid::now_v7(), f.alice.id, f.bob.id, None, now).await.unwrap();
        assert!(created);
        let (again, created) =
            f.store.open_direct_conversation(Uuid::now_v7(), f.bob.id, f.alice.id, None, now).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);
        assert_ne!(first.id, f.conversation.id);
    }
}
