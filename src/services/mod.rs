pub mod auth_service;
pub mod conversation_service;
pub mod delivery_tracker;
pub mod gateway;
pub mod health_service;
pub mod message_service;
