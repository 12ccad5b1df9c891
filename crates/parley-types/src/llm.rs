//! LLM request/response types for Parley.
//!
//! These types model the data shapes for the streaming completion call:
//! the request, the tagged stream events, token usage, and provider errors.

use serde::{Deserialize, Serialize};

use crate::chat::{Role, Turn};

/// Request to an LLM provider for a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier as understood by the provider (e.g. `gpt-4o-mini`).
    pub model: String,
    /// Full conversation, system turn first.
    pub messages: Vec<Turn>,
    /// Opaque end-user tag forwarded for abuse monitoring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_user: Option<String>,
}

/// Token usage for a completed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Events emitted during a streaming LLM response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The provider announced the speaking role (usually once, first).
    Role { role: Role },

    /// A fragment of reply text.
    TextDelta { text: String },

    /// Token usage summary, typically on the final chunk.
    Usage(TokenUsage),
}

/// Errors from LLM provider operations.
///
/// Each variant carries the provider's own message as best-effort detail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("provider server error: {message}")]
    ServerError { message: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// The response body ended before the stream terminator arrived.
    #[error("stream ended prematurely: {0}")]
    StreamTruncated(String),

    #[error("provider error: {message}")]
    Provider { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_is_tagged() {
        let json = serde_json::to_value(StreamEvent::TextDelta {
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn test_llm_error_display_includes_detail() {
        let err = LlmError::RateLimited {
            message: "You exceeded your current quota".to_string(),
        };
        assert_eq!(err.to_string(), "rate limited: You exceeded your current quota");
    }
}
