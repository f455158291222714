use serde::{Deserialize, Serialize};

// ==================================================================================================
// Models for /v1/chat/completions
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

// ==================================================================================================
// Models for /v1/embeddings
// ==================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: String,
}

/// Body of one benchmark request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestPayload {
    Chat(ChatCompletionRequest),
    Embedding(EmbeddingRequest),
}

impl RequestPayload {
    /// The text the request carries, regardless of shape
    pub fn content(&self) -> &str {
        match self {
            RequestPayload::Chat(req) => req
                .messages
                .first()
                .map(|m| m.content.as_str())
                .unwrap_or_default(),
            RequestPayload::Embedding(req) => &req.input,
        }
    }

    pub fn max_tokens(&self) -> Option<u32> {
        match self {
            RequestPayload::Chat(req) => Some(req.max_tokens),
            RequestPayload::Embedding(_) => None,
        }
    }
}

// ==================================================================================================
// Usage accounting (shared by both endpoints)
// ==================================================================================================

/// Token usage as reported by the server. Every field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// True when the server reported nothing usable for the prompt side
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.unwrap_or(0) == 0 && self.total_tokens.unwrap_or(0) == 0
    }
}

/// The only part of a response body the benchmark reads.
/// Unknown fields (choices, data, id, ...) are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageEnvelope {
    #[serde(default)]
    pub usage: Option<Usage>,
}
