use crate::api::AppState;
use crate::api::dto::messages::MessageReadResponse;
use crate::api::middleware::AuthUser;
use crate::error::Result;
use crate::protocol::{MessageView, ServerEvent};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use time::OffsetDateTime;
use uuid::Uuid;

/// Marks one message as read by the caller and tells the conversation.
///
/// # Errors
/// Returns `AppError::NotFound` if the message is not in one of the caller's conversations.
/// Returns `AppError::NotParticipant` if the caller sent the message.
pub async fn mark_message_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<MessageReadResponse>> {
    let user = &auth_user.user;
    let (conversation, message) = state.conversation_service.find_message_for_member(message_id, user.id).await?;
    let receipt = state.message_service.delivery().mark_read(&message, &conversation, user.id).await?;

    let event = ServerEvent::ReadReceipt {
        message_id,
        user_id: user.id,
        username: user.username.clone(),
        read_at: receipt.read_at.unwrap_or_else(OffsetDateTime::now_utc),
    };
    state.gateway_service.publish(conversation.id, &event);

    Ok(Json(MessageReadResponse { status: "Message marked as read", read_at: receipt.read_at }))
}

/// # Errors
/// Returns `AppError::NotFound` if the message is not in one of the caller's conversations.
/// Returns `AppError::PermissionDenied` unless the caller sent it, moderates its community or is a super admin.
/// Returns `AppError::ValidationFailed` if the message is deleted.
pub async fn pin_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<MessageView>> {
    set_pinned(&auth_user, &state, message_id, true).await
}

/// # Errors
/// Same as [`pin_message`].
pub async fn unpin_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<MessageView>> {
    set_pinned(&auth_user, &state, message_id, false).await
}

/// Soft-deletes one of the caller's messages. Deleting twice is a no-op.
///
/// # Errors
/// Returns `AppError::NotFound` if the message is not in one of the caller's conversations.
/// Returns `AppError::PermissionDenied` if the caller did not send it.
pub async fn delete_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode> {
    let user = &auth_user.user;
    let (conversation, _) = state.conversation_service.find_message_for_member(message_id, user.id).await?;
    if state.message_service.delete(&conversation, user, message_id).await?.is_some() {
        state.gateway_service.publish(conversation.id, &ServerEvent::MessageDeleted { message_id });
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn set_pinned(auth_user: &AuthUser, state: &AppState, message_id: Uuid, pinned: bool) -> Result<Json<MessageView>> {
    let user = &auth_user.user;
    let (conversation, _) = state.conversation_service.find_message_for_member(message_id, user.id).await?;
    let message = state.message_service.set_pinned(&conversation, user, message_id, pinned).await?;

    let announced = state.message_service.render_for_sender(&conversation, &message).await?;
    state.gateway_service.publish(conversation.id, &ServerEvent::MessagePinned { message: announced });

    let view = state.message_service.render_one(&conversation, &message, user).await?;
    Ok(Json(view))
}
