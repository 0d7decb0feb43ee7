#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    missing_debug_implementations,
    unreachable_pub
)]
use confide_server::adapters::ChatStore;
use confide_server::adapters::database::PgChatStore;
use confide_server::domain::conversation::Conversation;
use confide_server::domain::message::NewMessage;
use confide_server::domain::user::{Role, User};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

mod common;

struct Pair {
    store: PgChatStore,
    alice: User,
    bob: User,
    conversation: Conversation,
}

/// Postgres keeps microseconds; whole seconds compare equal after a round trip.
fn now() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(OffsetDateTime::now_utc().unix_timestamp()).unwrap()
}

async fn register(store: &PgChatStore, prefix: &str, role: Role) -> User {
    let user = User::new(common::generate_username(prefix), role);
    store.create_user(&user).await.unwrap();
    user
}

async fn pair() -> Option<Pair> {
    let store = PgChatStore::new(common::get_test_pool().await?);
    let alice = register(&store, "alice", Role::User).await;
    let bob = register(&store, "bob", Role::Admin).await;
    let conversation = store.create_conversation(Uuid::now_v7(), &[alice.id, bob.id], None, now()).await.unwrap();
    Some(Pair { store, alice, bob, conversation })
}

fn message(p: &Pair, created_at: OffsetDateTime) -> NewMessage {
    NewMessage {
        id: Uuid::now_v7(),
        conversation_id: p.conversation.id,
        sender_id: p.alice.id,
        content: Some("hello".into()),
        reply_to_id: None,
        attachments: vec![],
        created_at,
    }
}

#[tokio::test]
async fn test_mark_read_keeps_first_read_at() {
    let Some(p) = pair().await else { return };
    let msg = p.store.create_message(message(&p, now()), &[p.bob.id]).await.unwrap();

    let first = now();
    let receipt = p.store.mark_read(msg.id, p.bob.id, first).await.unwrap();
    assert_eq!(receipt.read_at, Some(first));
    assert_eq!(receipt.delivered_at, msg.created_at);

    let again = p.store.mark_read(msg.id, p.bob.id, first + Duration::seconds(30)).await.unwrap();
    assert_eq!(again.read_at, Some(first));

    let stored = p.store.receipts_for(&[msg.id]).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].read_at, Some(first));
}

#[tokio::test]
async fn test_read_without_delivery_row_is_not_lost() {
    let Some(p) = pair().await else { return };
    let msg = p.store.create_message(message(&p, now()), &[p.bob.id]).await.unwrap();

    // Joined after the message was sent, so no delivery receipt exists for carol.
    let carol = register(&p.store, "carol", Role::Admin).await;
    p.store.add_participant(p.conversation.id, carol.id, now()).await.unwrap();

    let read_at = now();
    let receipt = p.store.mark_read(msg.id, carol.id, read_at).await.unwrap();
    assert_eq!(receipt.read_at, Some(read_at));

    let receipts = p.store.receipts_for(&[msg.id]).await.unwrap();
    let carols: Vec<_> = receipts.iter().filter(|r| r.user_id == carol.id).collect();
    assert_eq!(carols.len(), 1);
    assert_eq!(carols[0].read_at, Some(read_at));
    assert_eq!(p.store.unread_count(p.conversation.id, carol.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_edit_refused_for_deleted_or_expired_messages() {
    let Some(p) = pair().await else { return };
    let at = now();
    let window = Duration::minutes(10);

    let deleted = p.store.create_message(message(&p, at), &[p.bob.id]).await.unwrap();
    assert!(p.store.soft_delete_message(deleted.id, p.alice.id, at).await.unwrap().is_some());
    assert!(p.store.soft_delete_message(deleted.id, p.alice.id, at).await.unwrap().is_none());
    assert!(p.store.edit_message(deleted.id, p.alice.id, "back", at, at - window).await.unwrap().is_none());
    assert!(p.store.set_pinned(deleted.id, true, at).await.unwrap().is_none());

    let expired = p.store.create_message(message(&p, at - Duration::minutes(11)), &[p.bob.id]).await.unwrap();
    assert!(p.store.edit_message(expired.id, p.alice.id, "late", at, at - window).await.unwrap().is_none());
    let stored = p.store.find_message(expired.id).await.unwrap().unwrap();
    assert_eq!(stored.content.as_deref(), Some("hello"));
    assert!(!stored.edited);

    let fresh = p.store.create_message(message(&p, at), &[p.bob.id]).await.unwrap();
    assert!(p.store.edit_message(fresh.id, p.bob.id, "not mine", at, at - window).await.unwrap().is_none());
    let edited = p.store.edit_message(fresh.id, p.alice.id, "changed", at, at - window).await.unwrap().unwrap();
    assert!(edited.edited);
    assert_eq!(edited.edited_at, Some(at));
}

#[tokio::test]
async fn test_deliveries_are_idempotent() {
    let Some(p) = pair().await else { return };

    let msg = p.store.create_message(message(&p, now()), &[p.bob.id, p.bob.id]).await.unwrap();

    let receipts = p.store.receipts_for(&[msg.id]).await.unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].user_id, p.bob.id);
    assert!(receipts[0].read_at.is_none());

    let conversation = p.store.find_conversation(p.conversation.id).await.unwrap().unwrap();
    assert_eq!(conversation.last_message_at, Some(msg.created_at));
}

#[tokio::test]
async fn test_failed_message_write_rolls_back() {
    let Some(p) = pair().await else { return };

    let result = p.store.create_message(message(&p, now()), &[p.bob.id, Uuid::new_v4()]).await;
    assert!(result.is_err());

    assert!(p.store.list_messages(p.conversation.id, p.alice.id).await.unwrap().is_empty());
    let conversation = p.store.find_conversation(p.conversation.id).await.unwrap().unwrap();
    assert!(conversation.last_message_at.is_none());
}

#[tokio::test]
async fn test_mark_conversation_read_clears_unread() {
    let Some(p) = pair().await else { return };
    for _ in 0..2 {
        p.store.create_message(message(&p, now()), &[p.bob.id]).await.unwrap();
    }

    assert_eq!(p.store.unread_count(p.conversation.id, p.bob.id).await.unwrap(), 2);
    assert_eq!(p.store.mark_conversation_read(p.conversation.id, p.bob.id, now()).await.unwrap(), 2);
    assert_eq!(p.store.mark_conversation_read(p.conversation.id, p.bob.id, now()).await.unwrap(), 0);
    assert_eq!(p.store.unread_count(p.conversation.id, p.bob.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_direct_opens_share_one_conversation() {
    let Some(p) = pair().await else { return };
    let at = now();

    let (first, second) = tokio::join!(
        p.store.open_direct_conversation(Uuid::now_v7(), p.alice.id, p.bob.id, None, at),
        p.store.open_direct_conversation(Uuid::now_v7(), p.bob.id, p.alice.id, None, at)
    );
    let ((first, first_created), (second, second_created)) = (first.unwrap(), second.unwrap());

    assert_eq!(first.id, second.id);
    assert!(first_created ^ second_created);
    assert_ne!(first.id, p.conversation.id);
    assert_eq!(first.participants.len(), 2);

    let (again, created) =
        p.store.open_direct_conversation(Uuid::now_v7(), p.alice.id, p.bob.id, None, at).await.unwrap();
    assert!(!created);
    assert_eq!(again.id, first.id);
}
