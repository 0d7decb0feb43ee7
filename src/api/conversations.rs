use crate::api::AppState;
use crate::api::dto::conversations::{
    AddParticipantRequest, ConversationResponse, MarkReadResponse, OpenConversationRequest, UnreadCountResponse,
};
use crate::api::middleware::AuthUser;
use crate::error::Result;
use crate::protocol::MessageView;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Lists the caller's conversations, most recently active first.
///
/// # Errors
/// Returns `AppError::Database` if the listing fails.
pub async fn list_conversations(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationResponse>>> {
    let overviews = state.conversation_service.list(&auth_user.user).await?;
    Ok(Json(overviews.into_iter().map(ConversationResponse::from).collect()))
}

/// Opens a two-party conversation, reusing an existing one for the same pair
/// and community.
///
/// # Errors
/// Returns `AppError::PermissionDenied` if the caller may not contact the target.
/// Returns `AppError::NotFound` if the target or community does not exist.
/// Returns `AppError::ValidationFailed` when targeting oneself.
pub async fn open_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<OpenConversationRequest>,
) -> Result<impl IntoResponse> {
    let (conversation, created) = state
        .conversation_service
        .open(&auth_user.user, payload.target_user_id, payload.community_id)
        .await?;
    let overview = state.conversation_service.overview(conversation, &auth_user.user).await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ConversationResponse::from(overview))))
}

/// # Errors
/// Returns `AppError::NotParticipant` if the caller is not in the conversation.
pub async fn get_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationResponse>> {
    let conversation = state.conversation_service.find_for_member(conversation_id, auth_user.user.id).await?;
    let overview = state.conversation_service.overview(conversation, &auth_user.user).await?;
    Ok(Json(ConversationResponse::from(overview)))
}

/// Message history as seen by the caller.
///
/// # Errors
/// Returns `AppError::NotParticipant` if the caller is not in the conversation.
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<MessageView>>> {
    let history = state.conversation_service.history(conversation_id, &auth_user.user).await?;
    Ok(Json(history))
}

/// # Errors
/// Returns `AppError::NotParticipant` if the caller is not in the conversation.
pub async fn unread_count(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<UnreadCountResponse>> {
    let unread_count = state.conversation_service.unread_count(conversation_id, &auth_user.user).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

/// # Errors
/// Returns `AppError::Database` if a count fails.
pub async fn unread_total(auth_user: AuthUser, State(state): State<AppState>) -> Result<Json<UnreadCountResponse>> {
    let unread_count = state.conversation_service.unread_total(&auth_user.user).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

/// Marks every message the caller received in the conversation as read.
///
/// # Errors
/// Returns `AppError::NotParticipant` if the caller is not in the conversation.
pub async fn mark_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<MarkReadResponse>> {
    let marked = state.conversation_service.mark_read(conversation_id, &auth_user.user).await?;
    Ok(Json(MarkReadResponse { status: "marked as read", marked }))
}

/// # Errors
/// Returns `AppError::PermissionDenied` if the caller is not staff.
/// Returns `AppError::ValidationFailed` if the user already participates.
pub async fn add_participant(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(payload): Json<AddParticipantRequest>,
) -> Result<Json<ConversationResponse>> {
    let conversation =
        state.conversation_service.add_participant(&auth_user.user, conversation_id, payload.user_id).await?;
    let overview = state.conversation_service.overview(conversation, &auth_user.user).await?;
    Ok(Json(ConversationResponse::from(overview)))
}
