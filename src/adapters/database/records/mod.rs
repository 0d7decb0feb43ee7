pub mod attachment;
pub mod community;
pub mod conversation;
pub mod message;
pub mod receipt;
pub mod user;

pub use attachment::AttachmentRecord;
pub use community::CommunityRecord;
pub use conversation::{ConversationRecord, ParticipantRecord};
pub use message::MessageRecord;
pub use receipt::ReadReceiptRecord;
pub use user::UserRecord;
