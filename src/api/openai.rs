//! OpenAI-compatible request and response types.

use serde::{Deserialize, Serialize};

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

/// A chat message; doubles as the `delta` object in stream chunks, where
/// either field may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A `chat.completion` object or a `chat.completion.chunk`, depending on
/// `object` and whether choices carry `message` or `delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChatMessage>,
    /// Serialized as `null` until the finish chunk.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token accounting is out of scope; the zeroed object keeps SDKs happy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn request_fields_default_when_absent() {
        let req: ChatRequest = serde_json::from_str(r#"{"messages":[]}"#).unwrap();
        assert_eq!(req.model, "");
        assert!(!req.stream);
        assert!(req.messages.is_empty());
    }

    #[test]
    fn finish_reason_serializes_as_null_when_unset() {
        let choice = Choice {
            index: 0,
            message: None,
            delta: Some(ChatMessage {
                role: Some("assistant".to_string()),
                content: None,
            }),
            finish_reason: None,
        };
        let value: Value = serde_json::to_value(&choice).unwrap();
        assert!(value["finish_reason"].is_null());
        assert_eq!(value["delta"]["role"], "assistant");
        assert!(value["delta"].get("content").is_none());
        assert!(value.get("message").is_none());
    }

    #[test]
    fn empty_delta_serializes_as_empty_object() {
        let choice = Choice {
            index: 0,
            message: None,
            delta: Some(ChatMessage::default()),
            finish_reason: Some("stop".to_string()),
        };
        let value: Value = serde_json::to_value(&choice).unwrap();
        assert_eq!(value["delta"], serde_json::json!({}));
        assert_eq!(value["finish_reason"], "stop");
    }
}
