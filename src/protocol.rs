//! Wire vocabulary of the realtime endpoint.
//!
//! Every frame is a JSON object discriminated by its `type` field. Inbound and
//! outbound events are closed sets: anything not listed here is rejected with a
//! local `error` event.

use crate::domain::attachment::{Attachment, AttachmentKind, DEFAULT_MIME_TYPE, NewAttachment};
use crate::domain::receipt::{MessageStatus, ReadReceipt};
use crate::domain::user::{Role, User};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(alias = "send")]
    ChatMessage {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        reply_to_id: Option<Uuid>,
        #[serde(default)]
        attachments: Vec<AttachmentUpload>,
    },
    Typing {
        #[serde(default)]
        is_typing: bool,
    },
    ReadReceipt {
        message_id: Uuid,
    },
    #[serde(alias = "edit")]
    EditMessage {
        message_id: Uuid,
        content: String,
    },
    #[serde(alias = "delete")]
    DeleteMessage {
        message_id: Uuid,
    },
    #[serde(alias = "pin")]
    PinMessage {
        message_id: Uuid,
        #[serde(default)]
        is_pinned: bool,
    },
    Unpin {
        message_id: Uuid,
    },
    Ping,
}

impl ClientEvent {
    /// Decodes one inbound text frame.
    ///
    /// # Errors
    /// Returns `AppError::MalformedPayload` for invalid JSON, unknown event types
    /// or missing fields.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text).map_err(|e| match e.classify() {
            Category::Syntax | Category::Eof | Category::Io => AppError::MalformedPayload("Invalid JSON".into()),
            Category::Data => AppError::MalformedPayload(e.to_string()),
        })
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => "chat_message",
            Self::Typing { .. } => "typing",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::PinMessage { .. } => "pin_message",
            Self::Unpin { .. } => "unpin",
            Self::Ping => "ping",
        }
    }
}

/// Metadata of an already-stored blob attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttachmentUpload {
    pub file: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: i64,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl From<AttachmentUpload> for NewAttachment {
    fn from(upload: AttachmentUpload) -> Self {
        Self {
            file: upload.file,
            file_name: upload.file_name,
            file_size: upload.file_size,
            mime_type: upload.mime_type.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageCreated {
        message: MessageView,
    },
    MessageEdited {
        message: MessageView,
    },
    MessageDeleted {
        message_id: Uuid,
    },
    MessagePinned {
        message: MessageView,
    },
    Typing {
        user_id: Uuid,
        username: String,
        is_typing: bool,
    },
    ReadReceipt {
        message_id: Uuid,
        user_id: Uuid,
        username: String,
        #[serde(with = "time::serde::rfc3339")]
        read_at: OffsetDateTime,
    },
    Presence {
        user_id: Uuid,
        username: String,
        status: PresenceStatus,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ServerEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message_created",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::MessagePinned { .. } => "message_pinned",
            Self::Typing { .. } => "typing",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::Presence { .. } => "presence",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self { id: user.id, username: user.username.clone(), role: user.role }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentView {
    pub id: Uuid,
    pub file: String,
    pub file_type: AttachmentKind,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

impl From<&Attachment> for AttachmentView {
    fn from(a: &Attachment) -> Self {
        Self {
            id: a.id,
            file: a.file.clone(),
            file_type: a.kind,
            file_name: a.file_name.clone(),
            file_size: a.file_size,
            mime_type: a.mime_type.clone(),
            uploaded_at: a.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptView {
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub delivered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
}

impl From<&ReadReceipt> for ReceiptView {
    fn from(r: &ReadReceipt) -> Self {
        Self { user_id: r.user_id, delivered_at: r.delivered_at, read_at: r.read_at }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyView {
    pub id: Uuid,
    pub sender: UserSummary,
    pub content: Option<String>,
    pub attachments: Vec<AttachmentView>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation: Uuid,
    pub sender: UserSummary,
    pub content: Option<String>,
    pub reply_to: Option<ReplyView>,
    pub is_edited: bool,
    pub is_pinned: bool,
    pub is_deleted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
    pub attachments: Vec<AttachmentView>,
    pub message_reads: Vec<ReceiptView>,
    pub status: MessageStatus,
    pub can_edit: bool,
}
