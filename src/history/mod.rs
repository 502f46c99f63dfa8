//! Message audit trail: every prompt sent to the agent and every reply it
//! produced, with delivery status.

mod models;
mod repository;

pub use models::{Conversation, Message, MessageRole, MessageStatus};
pub use repository::MessageRepository;
