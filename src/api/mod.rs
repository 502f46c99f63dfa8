//! HTTP surface: router, shared state, error rendering, and the chat
//! pipeline.

mod chat;
mod error;
mod openai;
mod prompt;
mod routes;
mod state;

pub use error::ApiError;
pub use openai::{ChatMessage, ChatRequest, ChatResponse, Choice, Usage};
pub use prompt::messages_to_xml;
pub use routes::create_router;
pub use state::AppState;
