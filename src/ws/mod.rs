//! WebSocket transport to the browser-extension agent.

mod handler;
mod hub;
mod types;

pub use handler::ws_handler;
pub use hub::{Hub, HubError, Session};
pub use types::{Frame, FrameType, ReplyPayload, ReplyStatus, SendMessagePayload};
