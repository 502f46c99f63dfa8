//! Wire frames exchanged with the extension.
//!
//! Frames are JSON text messages of the shape `{id?, reply_to?, type,
//! payload?}`. Server-originated commands carry `id`; agent replies echo it
//! back as `reply_to`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of frame types.
///
/// Anything else on the wire decodes to `Unknown` and is dropped downstream
/// instead of failing the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameType {
    /// Server heartbeat probe.
    Ping,
    /// Agent heartbeat response.
    Pong,
    /// Alternate spelling of the heartbeat response used by older agents.
    EventPong,
    /// Server command carrying a prompt for the agent.
    CmdSendMessage,
    /// Agent reply (partial or terminal) to a command.
    EventReply,
    /// Agent-reported failure for a command.
    EventError,
    #[serde(other)]
    Unknown,
}

/// One message on the agent link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Frame {
    /// Application-level heartbeat probe.
    pub fn ping() -> Self {
        Self {
            id: None,
            reply_to: None,
            frame_type: FrameType::Ping,
            payload: None,
        }
    }
}

/// Reply status reported by the agent.
///
/// A task sees zero or more `PROCESSING` payloads followed by exactly one
/// `DONE` or `ERROR`. A payload that omits the field decodes as
/// `PROCESSING`, matching how agents that only set it on terminal frames
/// behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyStatus {
    #[default]
    Processing,
    Done,
    Error,
}

/// Decoded payload of an `EVENT_REPLY` or `EVENT_ERROR` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyPayload {
    /// Cumulative text so far (`PROCESSING`) or the canonical final form
    /// (`DONE`).
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub status: ReplyStatus,
    /// Agent-side conversation identifier.
    #[serde(default)]
    pub conversation_id: String,
    /// Populated iff `status` is `ERROR`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of a `CMD_SEND_MESSAGE` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagePayload {
    pub prompt: String,
    pub conversation_id: String,
}
