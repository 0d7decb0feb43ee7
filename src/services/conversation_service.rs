use crate::adapters::ChatStore;
use crate::domain::conversation::{Conversation, validate_participants};
use crate::domain::message::Message;
use crate::domain::user::{Role, User};
use crate::error::{AppError, Result};
use crate::protocol::MessageView;
use crate::services::delivery_tracker::DeliveryTracker;
use crate::services::message_service::MessageService;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// A conversation as listed for one participant.
#[derive(Debug, Clone)]
pub struct ConversationOverview {
    pub conversation: Conversation,
    pub participants: Vec<User>,
    pub unread_count: i64,
    pub last_message: Option<Message>,
    pub last_message_sender: Option<String>,
}

/// Conversation membership rules and the read-side queries built on them.
#[derive(Clone, Debug)]
pub struct ConversationService {
    store: Arc<dyn ChatStore>,
    messages: MessageService,
    delivery: DeliveryTracker,
}

impl ConversationService {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, messages: MessageService, delivery: DeliveryTracker) -> Self {
        Self { store, messages, delivery }
    }

    /// Loads a conversation `user_id` takes part in.
    ///
    /// Unknown conversations are reported the same way as foreign ones.
    ///
    /// # Errors
    /// Returns `AppError::NotParticipant` if the conversation is missing or the user is not in it.
    pub async fn find_for_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation> {
        self.store
            .find_conversation(conversation_id)
            .await?
            .filter(|c| c.is_participant(user_id))
            .ok_or(AppError::NotParticipant)
    }

    /// Loads a message together with its conversation, which `user_id` must take part in.
    ///
    /// Messages of foreign conversations are reported as missing.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the message does not exist or the user is not in its conversation.
    pub async fn find_message_for_member(&self, message_id: Uuid, user_id: Uuid) -> Result<(Conversation, Message)> {
        let message = self.store.find_message(message_id).await?.ok_or(AppError::NotFound)?;
        let conversation = self
            .store
            .find_conversation(message.conversation_id)
            .await?
            .filter(|c| c.is_participant(user_id))
            .ok_or(AppError::NotFound)?;
        Ok((conversation, message))
    }

    /// Returns the existing two-party conversation for this pair and community
    /// context, or creates one. The flag is `true` when a conversation was created.
    ///
    /// # Errors
    /// Returns `AppError::ValidationFailed` when targeting oneself.
    /// Returns `AppError::NotFound` if the target or community does not exist.
    /// Returns `AppError::PermissionDenied` if a regular user targets a non-staff user,
    /// a community they are not subscribed to, or someone other than its moderator.
    #[tracing::instrument(
        err(level = "debug"),
        skip(self, requester),
        fields(requester_id = %requester.id)
    )]
    pub async fn open(
        &self,
        requester: &User,
        target_user_id: Uuid,
        community_id: Option<Uuid>,
    ) -> Result<(Conversation, bool)> {
        if target_user_id == requester.id {
            return Err(AppError::ValidationFailed("Cannot open a conversation with yourself".into()));
        }
        let target = self.store.find_user(target_user_id).await?.ok_or(AppError::NotFound)?;
        let community = match community_id {
            Some(id) => Some(self.store.find_community(id).await?.ok_or(AppError::NotFound)?),
            None => None,
        };

        if requester.role == Role::User {
            if !target.role.is_staff() {
                tracing::debug!("Regular users may only message admins");
                return Err(AppError::PermissionDenied);
            }
            if let Some(community) = &community {
                if !self.store.is_subscribed(community.id, requester.id).await? {
                    tracing::debug!(community_id = %community.id, "Requester is not subscribed");
                    return Err(AppError::PermissionDenied);
                }
                if community.moderator_id != target.id {
                    tracing::debug!(community_id = %community.id, "Target is not the community moderator");
                    return Err(AppError::PermissionDenied);
                }
            }
        }

        validate_participants(&[requester.id, target.id])?;
        let (conversation, created) = self
            .store
            .open_direct_conversation(Uuid::now_v7(), requester.id, target.id, community_id, OffsetDateTime::now_utc())
            .await?;

        if created {
            tracing::info!(conversation_id = %conversation.id, "Conversation created");
        }
        Ok((conversation, created))
    }

    /// Conversations of `user`, most recently active first.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the listing fails.
    #[tracing::instrument(err(level = "warn"), skip(self, user), fields(user_id = %user.id))]
    pub async fn list(&self, user: &User) -> Result<Vec<ConversationOverview>> {
        let conversations = self.store.list_conversations(user.id).await?;
        let mut overviews = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            overviews.push(self.overview(conversation, user).await?);
        }
        Ok(overviews)
    }

    /// Participants, unread count and last visible message of one conversation.
    ///
    /// # Errors
    /// Returns `AppError::Database` if a lookup fails.
    pub async fn overview(&self, conversation: Conversation, user: &User) -> Result<ConversationOverview> {
        let ids: Vec<Uuid> = conversation.participant_ids().collect();
        let participants = self.store.find_users(&ids).await?;
        let unread_count = self.delivery.unread_count(&conversation, user.id).await?;
        let last_message = self.store.last_visible_message(conversation.id).await?;
        let last_message_sender = last_message
            .as_ref()
            .and_then(|m| participants.iter().find(|p| p.id == m.sender_id))
            .map(|p| p.username.clone());

        Ok(ConversationOverview { conversation, participants, unread_count, last_message, last_message_sender })
    }

    /// Adds `user_id` to a conversation. Only staff participants may grow a conversation.
    ///
    /// # Errors
    /// Returns `AppError::NotParticipant` if the requester is not in the conversation.
    /// Returns `AppError::PermissionDenied` if the requester is not staff.
    /// Returns `AppError::NotFound` if the user does not exist.
    /// Returns `AppError::ValidationFailed` if the user already participates.
    #[tracing::instrument(err(level = "debug"), skip(self, requester), fields(requester_id = %requester.id))]
    pub async fn add_participant(&self, requester: &User, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation> {
        let conversation = self.find_for_member(conversation_id, requester.id).await?;
        if !requester.role.is_staff() {
            return Err(AppError::PermissionDenied);
        }
        if self.store.find_user(user_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        if conversation.is_participant(user_id) {
            return Err(AppError::ValidationFailed("User is already a participant".into()));
        }

        let conversation = self.store.add_participant(conversation.id, user_id, OffsetDateTime::now_utc()).await?;
        tracing::info!(conversation_id = %conversation.id, added = %user_id, "Participant added");
        Ok(conversation)
    }

    /// Messages of a conversation as seen by `viewer`.
    ///
    /// # Errors
    /// Returns `AppError::NotParticipant` if the viewer is not in the conversation.
    pub async fn history(&self, conversation_id: Uuid, viewer: &User) -> Result<Vec<MessageView>> {
        let conversation = self.find_for_member(conversation_id, viewer.id).await?;
        self.messages.history(&conversation, viewer).await
    }

    /// Marks the whole conversation as read for `user`.
    ///
    /// # Errors
    /// Returns `AppError::NotParticipant` if the user is not in the conversation.
    pub async fn mark_read(&self, conversation_id: Uuid, user: &User) -> Result<u64> {
        let conversation = self.find_for_member(conversation_id, user.id).await?;
        self.delivery.mark_conversation_read(&conversation, user.id).await
    }

    /// # Errors
    /// Returns `AppError::NotParticipant` if the user is not in the conversation.
    pub async fn unread_count(&self, conversation_id: Uuid, user: &User) -> Result<i64> {
        let conversation = self.find_for_member(conversation_id, user.id).await?;
        self.delivery.unread_count(&conversation, user.id).await
    }

    /// Unread messages across every conversation of `user`.
    ///
    /// # Errors
    /// Returns `AppError::Database` if a count fails.
    pub async fn unread_total(&self, user: &User) -> Result<i64> {
        let mut total = 0;
        for conversation in self.store.list_conversations(user.id).await? {
            total += self.delivery.unread_count(&conversation, user.id).await?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryChatStore;
    use crate::config::MessagingConfig;
    use crate::domain::community::Community;
    use crate::services::message_service::MessageDraft;

    struct Fixture {
        store: Arc<MemoryChatStore>,
        service: ConversationService,
        messages: MessageService,
        member: User,
        admin: User,
        other_admin: User,
        community: Community,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryChatStore::new());
        let member = User::new("member", Role::User);
        let admin = User::new("admin", Role::Admin);
        let other_admin = User::new("other_admin", Role::Admin);
        for user in [&member, &admin, &other_admin] {
            store.insert_user(user.clone()).unwrap();
        }
        let community = Community::new("confessions", admin.id);
        store.insert_community(community.clone()).unwrap();

        let delivery = DeliveryTracker::new(store.clone());
        let messages = MessageService::new(store.clone(), delivery.clone(), &MessagingConfig { edit_window_secs: 600 });
        let service = ConversationService::new(store.clone(), messages.clone(), delivery);
        Fixture { store, service, messages, member, admin, other_admin, community }
    }

    #[tokio::test]
    async fn test_open_reuses_existing_conversation() {
        let f = fixture();
        let (first, created) = f.service.open(&f.member, f.admin.id, None).await.unwrap();
        assert!(created);

        let (second, created) = f.service.open(&f.member, f.admin.id, None).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let (reverse, created) = f.service.open(&f.admin, f.member.id, None).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, reverse.id);
    }

    #[tokio::test]
    async fn test_concurrent_opens_converge_on_one_conversation() {
        let f = fixture();

        let (a, b) = tokio::join!(
            f.service.open(&f.member, f.admin.id, None),
            f.service.open(&f.admin, f.member.id, None)
        );
        let ((a, a_created), (b, b_created)) = (a.unwrap(), b.unwrap());

        assert_eq!(a.id, b.id);
        assert!(a_created ^ b_created);
        assert_eq!(f.service.list(&f.member).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_regular_users_may_only_message_staff() {
        let f = fixture();
        let peer = User::new("peer", Role::User);
        f.store.insert_user(peer.clone()).unwrap();

        assert!(matches!(f.service.open(&f.member, peer.id, None).await, Err(AppError::PermissionDenied)));
        assert!(matches!(f.service.open(&f.member, f.member.id, None).await, Err(AppError::ValidationFailed(_))));
        assert!(matches!(f.service.open(&f.member, Uuid::new_v4(), None).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_community_context_requires_subscription_and_moderator() {
        let f = fixture();
        let community = Some(f.community.id);

        assert!(matches!(f.service.open(&f.member, f.admin.id, community).await, Err(AppError::PermissionDenied)));

        f.store.subscribe(f.community.id, f.member.id).unwrap();
        assert!(matches!(
            f.service.open(&f.member, f.other_admin.id, community).await,
            Err(AppError::PermissionDenied)
        ));

        let (conversation, _) = f.service.open(&f.member, f.admin.id, community).await.unwrap();
        assert_eq!(conversation.community_id, community);
    }

    #[tokio::test]
    async fn test_find_for_member_hides_foreign_conversations() {
        let f = fixture();
        let (conversation, _) = f.service.open(&f.member, f.admin.id, None).await.unwrap();

        assert!(f.service.find_for_member(conversation.id, f.member.id).await.is_ok());
        assert!(matches!(
            f.service.find_for_member(conversation.id, f.other_admin.id).await,
            Err(AppError::NotParticipant)
        ));
        assert!(matches!(
            f.service.find_for_member(Uuid::new_v4(), f.member.id).await,
            Err(AppError::NotParticipant)
        ));
    }

    #[tokio::test]
    async fn test_messages_of_foreign_conversations_are_missing() {
        let f = fixture();
        let (conversation, _) = f.service.open(&f.member, f.admin.id, None).await.unwrap();
        let draft = MessageDraft { content: Some("hi".into()), ..MessageDraft::default() };
        let message = f.messages.send(&conversation, &f.member, draft).await.unwrap();

        let (found, loaded) = f.service.find_message_for_member(message.id, f.admin.id).await.unwrap();
        assert_eq!((found.id, loaded.id), (conversation.id, message.id));
        assert!(matches!(
            f.service.find_message_for_member(message.id, f.other_admin.id).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_only_staff_add_participants() {
        let f = fixture();
        let (conversation, _) = f.service.open(&f.member, f.admin.id, None).await.unwrap();

        assert!(matches!(
            f.service.add_participant(&f.member, conversation.id, f.other_admin.id).await,
            Err(AppError::PermissionDenied)
        ));
        let grown = f.service.add_participant(&f.admin, conversation.id, f.other_admin.id).await.unwrap();
        assert!(grown.is_participant(f.other_admin.id));
        assert!(matches!(
            f.service.add_participant(&f.admin, conversation.id, f.other_admin.id).await,
            Err(AppError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_list_reports_unread_and_preview() {
        let f = fixture();
        let (conversation, _) = f.service.open(&f.member, f.admin.id, None).await.unwrap();
        let draft = MessageDraft { content: Some("a".repeat(80)), ..MessageDraft::default() };
        f.messages.send(&conversation, &f.member, draft).await.unwrap();

        let listed = f.service.list(&f.admin).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].unread_count, 1);
        assert_eq!(listed[0].last_message_sender.as_deref(), Some("member"));
        assert_eq!(listed[0].last_message.as_ref().map(Message::preview), Some(format!("{}...", "a".repeat(50))));

        assert_eq!(f.service.unread_total(&f.admin).await.unwrap(), 1);
        f.service.mark_read(conversation.id, &f.admin).await.unwrap();
        assert_eq!(f.service.unread_total(&f.admin).await.unwrap(), 0);
    }
}
