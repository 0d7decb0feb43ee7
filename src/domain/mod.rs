pub mod attachment;
pub mod auth;
pub mod community;
pub mod conversation;
pub mod message;
pub mod permissions;
pub mod receipt;
pub mod user;
