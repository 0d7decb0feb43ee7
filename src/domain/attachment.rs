use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl AttachmentKind {
    /// Classifies a declared MIME type. Parameters (`; charset=...`) and case are ignored.
    #[must_use]
    pub fn classify(mime_type: &str) -> Self {
        let essence = mime_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

        if essence.starts_with("image/") {
            Self::Image
        } else if essence.starts_with("video/") {
            Self::Video
        } else if essence.starts_with("audio/") {
            Self::Audio
        } else if DOCUMENT_MIME_TYPES.contains(&essence.as_str()) {
            Self::Document
        } else {
            Self::Other
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Other => "other",
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown attachment kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    /// Opaque reference to the stored blob.
    pub file: String,
    pub kind: AttachmentKind,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub file: String,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
}

impl NewAttachment {
    #[must_use]
    pub fn into_attachment(self, message_id: Uuid, uploaded_at: OffsetDateTime) -> Attachment {
        Attachment {
            id: Uuid::now_v7(),
            message_id,
            kind: AttachmentKind::classify(&self.mime_type),
            file: self.file,
            file_name: self.file_name,
            file_size: self.file_size,
            mime_type: self.mime_type,
            uploaded_at,
        }
    }
}
