use crate::domain::message::{Message, MessageState};
use crate::domain::user::User;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// What a user may do to one message, resolved once per event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_pin: bool,
}

/// Resolves the capabilities of `user` over `message`.
///
/// `moderator_id` is the designated moderator of the conversation's community
/// context, if the conversation has one.
#[must_use]
pub fn resolve_permissions(
    user: &User,
    message: &Message,
    moderator_id: Option<Uuid>,
    now: OffsetDateTime,
    edit_window: Duration,
) -> Permissions {
    let is_sender = message.sender_id == user.id;
    let is_moderator = moderator_id == Some(user.id);
    let live = message.state() != MessageState::Deleted;

    Permissions {
        can_edit: is_sender && message.is_editable_at(now, edit_window),
        can_delete: is_sender && live,
        can_pin: live && (is_sender || is_moderator || user.role.is_elevated()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::NewMessage;
    use crate::domain::user::Role;

    const WINDOW: Duration = Duration::minutes(10);

    fn message_from(sender: &User, age: Duration) -> Message {
        NewMessage {
            id: Uuid::now_v7(),
            conversation_id: Uuid::new_v4(),
            sender_id: sender.id,
            content: Some("hi".into()),
            reply_to_id: None,
            attachments: vec![],
            created_at: OffsetDateTime::now_utc() - age,
        }
        .into_message()
    }

    #[test]
    fn test_sender_has_all_rights_inside_window() {
        let alice = User::new("alice", Role::User);
        let msg = message_from(&alice, Duration::minutes(1));

        let perms = resolve_permissions(&alice, &msg, None, OffsetDateTime::now_utc(), WINDOW);
        assert_eq!(perms, Permissions { can_edit: true, can_delete: true, can_pin: true });
    }

    #[test]
    fn test_sender_loses_edit_after_window() {
        let alice = User::new("alice", Role::User);
        let msg = message_from(&alice, Duration::minutes(11));

        let perms = resolve_permissions(&alice, &msg, None, OffsetDateTime::now_utc(), WINDOW);
        assert!(!perms.can_edit);
        assert!(perms.can_delete);
    }

    #[test]
    fn test_moderator_and_superadmin_may_pin_only() {
        let alice = User::new("alice", Role::User);
        let moderator = User::new("mod", Role::Admin);
        let root = User::new("root", Role::SuperAdmin);
        let msg = message_from(&alice, Duration::ZERO);
        let now = OffsetDateTime::now_utc();

        let perms = resolve_permissions(&moderator, &msg, Some(moderator.id), now, WINDOW);
        assert_eq!(perms, Permissions { can_edit: false, can_delete: false, can_pin: true });

        let perms = resolve_permissions(&root, &msg, None, now, WINDOW);
        assert!(perms.can_pin);
    }

    #[test]
    fn test_admin_outside_community_cannot_pin() {
        let alice = User::new("alice", Role::User);
        let other_admin = User::new("admin", Role::Admin);
        let msg = message_from(&alice, Duration::ZERO);

        let perms = resolve_permissions(&other_admin, &msg, Some(Uuid::new_v4()), OffsetDateTime::now_utc(), WINDOW);
        assert_eq!(perms, Permissions::default());
    }

    #[test]
    fn test_deleted_message_grants_nothing() {
        let alice = User::new("alice", Role::User);
        let mut msg = message_from(&alice, Duration::ZERO);
        msg.deleted = true;

        let perms = resolve_permissions(&alice, &msg, None, OffsetDateTime::now_utc(), WINDOW);
        assert_eq!(perms, Permissions::default());
    }
}
