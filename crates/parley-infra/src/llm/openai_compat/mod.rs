//! OpenAI-compatible streaming provider.
//!
//! Uses [`async_openai`] for type-safe request/response handling and
//! built-in SSE streaming. The base URL is configurable so any
//! OpenAI-compatible endpoint works.

pub mod streaming;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    ChatCompletionStreamOptions, CreateChatCompletionRequest, ImageUrl,
};
use secrecy::{ExposeSecret, SecretString};

use parley_core::llm::factory::ProviderFactory;
use parley_core::llm::provider::{BoxLlmProvider, CompletionStream, LlmProvider};
use parley_types::chat::{ContentPart, Role, Turn, TurnContent};
use parley_types::llm::{CompletionRequest, LlmError};

use self::streaming::map_openai_stream;

/// Default endpoint for the hosted OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Streaming provider for any OpenAI-compatible API.
///
/// # API Key Security
///
/// Does NOT derive Debug: the `async_openai::Client` holds the API key.
pub struct OpenAiCompatibleProvider {
    client: Client<OpenAIConfig>,
    provider_name: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_key: &SecretString, base_url: &str) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(base_url);

        Self {
            client: Client::with_config(openai_config),
            provider_name: "openai".to_string(),
        }
    }

    /// Build a streaming [`CreateChatCompletionRequest`] from a [`CompletionRequest`].
    fn build_request(&self, request: &CompletionRequest) -> CreateChatCompletionRequest {
        let messages = request.messages.iter().map(map_turn).collect();

        let mut req = CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            stream: Some(true),
            stream_options: Some(ChatCompletionStreamOptions {
                include_usage: Some(true),
                include_obfuscation: None,
            }),
            ..Default::default()
        };

        #[allow(deprecated)]
        {
            req.user = request.end_user.clone();
        }

        req
    }
}

fn map_turn(turn: &Turn) -> ChatCompletionRequestMessage {
    match turn.role {
        Role::System => ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
            content: ChatCompletionRequestSystemMessageContent::Text(turn.content.text()),
            name: None,
        }),
        Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: map_user_content(&turn.content),
            name: None,
        }),
        Role::Assistant => {
            #[allow(deprecated)]
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                    turn.content.text(),
                )),
                refusal: None,
                name: None,
                audio: None,
                tool_calls: None,
                function_call: None,
            })
        }
    }
}

fn map_user_content(content: &TurnContent) -> ChatCompletionRequestUserMessageContent {
    match content {
        TurnContent::Text(text) => ChatCompletionRequestUserMessageContent::Text(text.clone()),
        TurnContent::Parts(parts) => ChatCompletionRequestUserMessageContent::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => ChatCompletionRequestUserMessageContentPart::Text(
                        ChatCompletionRequestMessageContentPartText { text: text.clone() },
                    ),
                    ContentPart::ImageUrl { url } => {
                        ChatCompletionRequestUserMessageContentPart::ImageUrl(
                            ChatCompletionRequestMessageContentPartImage {
                                image_url: ImageUrl {
                                    url: url.clone(),
                                    detail: None,
                                },
                            },
                        )
                    }
                })
                .collect(),
        ),
    }
}

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn stream(&self, request: CompletionRequest) -> CompletionStream {
        let oai_request = self.build_request(&request);

        // Clone the client for the 'static stream
        let client = self.client.clone();

        Box::pin(async_stream::try_stream! {
            let oai_stream = client
                .chat()
                .create_stream(oai_request)
                .await
                .map_err(map_openai_error)?;

            let mut inner = map_openai_stream(oai_stream);

            use futures_util::StreamExt;
            while let Some(event) = inner.next().await {
                yield event?;
            }
        })
    }
}

/// Builds an [`OpenAiCompatibleProvider`] per guild API key.
#[derive(Debug, Clone)]
pub struct OpenAiProviderFactory {
    base_url: String,
}

impl OpenAiProviderFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for OpenAiProviderFactory {
    fn default() -> Self {
        Self::new(OPENAI_BASE_URL)
    }
}

impl ProviderFactory for OpenAiProviderFactory {
    fn create(&self, api_key: &SecretString) -> Result<BoxLlmProvider, LlmError> {
        Ok(Box::new(OpenAiCompatibleProvider::new(api_key, &self.base_url)))
    }
}

/// Map an `async_openai::error::OpenAIError` to an [`LlmError`].
pub(crate) fn map_openai_error(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");
            let message = api_err.message.clone();

            if matches!(code, "rate_limit_exceeded" | "insufficient_quota")
                || matches!(error_type, "rate_limit_error" | "insufficient_quota" | "requests")
            {
                LlmError::RateLimited { message }
            } else if code == "invalid_api_key"
                || error_type == "authentication_error"
                || message.contains("Incorrect API key")
            {
                LlmError::Unauthorized { message }
            } else if code == "context_length_exceeded" || error_type == "invalid_request_error" {
                LlmError::BadRequest { message }
            } else if code == "server_error" || error_type == "server_error" {
                LlmError::ServerError { message }
            } else {
                LlmError::Provider { message }
            }
        }
        OpenAIError::Reqwest(reqwest_err) => match reqwest_err.status() {
            Some(status) => classify_status(status.as_u16(), err.to_string()),
            None if is_truncation(&err.to_string()) => LlmError::StreamTruncated(err.to_string()),
            None => LlmError::Provider {
                message: err.to_string(),
            },
        },
        OpenAIError::StreamError(_) => {
            let message = err.to_string();
            if let Some(status) = status_in_message(&message) {
                classify_status(status, message)
            } else if is_truncation(&message) {
                LlmError::StreamTruncated(message)
            } else {
                LlmError::Provider { message }
            }
        }
        _ => LlmError::Provider {
            message: err.to_string(),
        },
    }
}

fn classify_status(status: u16, message: String) -> LlmError {
    match status {
        429 => LlmError::RateLimited { message },
        400 => LlmError::BadRequest { message },
        401 | 403 => LlmError::Unauthorized { message },
        500..=599 => LlmError::ServerError { message },
        _ => LlmError::Provider { message },
    }
}

/// Transport errors that mean the body ended before the SSE terminator.
fn is_truncation(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["prematurely", "unexpected eof", "error decoding response body", "connection closed"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Extract the status from event-source messages like "Invalid status code: 429 Too Many Requests".
fn status_in_message(message: &str) -> Option<u16> {
    let (_, rest) = message.split_once("status code: ")?;
    rest.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::{ApiError, OpenAIError};

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(&SecretString::from("sk-test-0123456789abcdef"), OPENAI_BASE_URL)
    }

    fn api_error(code: Option<&str>, error_type: Option<&str>, message: &str) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: error_type.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        })
    }

    #[test]
    fn test_build_request_maps_history() {
        let request = CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![
                Turn::system("Be brief."),
                Turn::user("hi"),
                Turn::assistant("hello"),
                Turn::user_with_images("what is this?", vec!["https://cdn.example/cat.png".to_string()]),
            ],
            end_user: Some("1-2-3".to_string()),
        };

        let oai_req = provider().build_request(&request);

        assert_eq!(oai_req.model, "gpt-4o-mini");
        assert_eq!(oai_req.messages.len(), 4);
        assert!(matches!(oai_req.messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(oai_req.messages[2], ChatCompletionRequestMessage::Assistant(_)));
        match &oai_req.messages[3] {
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Array(parts),
                ..
            }) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(
                    parts[1],
                    ChatCompletionRequestUserMessageContentPart::ImageUrl(_)
                ));
            }
            other => panic!("expected multipart user message, got {other:?}"),
        }

        assert_eq!(oai_req.stream, Some(true));
        assert_eq!(oai_req.stream_options.unwrap().include_usage, Some(true));
        #[allow(deprecated)]
        let user = oai_req.user.clone();
        assert_eq!(user.as_deref(), Some("1-2-3"));
    }

    #[test]
    fn test_factory_builds_named_provider() {
        let factory = OpenAiProviderFactory::default();
        let provider = factory
            .create(&SecretString::from("sk-test-0123456789abcdef"))
            .unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_map_api_errors() {
        assert!(matches!(
            map_openai_error(api_error(Some("insufficient_quota"), None, "You exceeded your current quota")),
            LlmError::RateLimited { message } if message.contains("quota")
        ));
        assert!(matches!(
            map_openai_error(api_error(Some("context_length_exceeded"), Some("invalid_request_error"), "too long")),
            LlmError::BadRequest { .. }
        ));
        assert!(matches!(
            map_openai_error(api_error(Some("invalid_api_key"), None, "Incorrect API key provided")),
            LlmError::Unauthorized { .. }
        ));
        assert!(matches!(
            map_openai_error(api_error(None, Some("server_error"), "The server had an error")),
            LlmError::ServerError { .. }
        ));
        assert!(matches!(
            map_openai_error(api_error(None, None, "something odd")),
            LlmError::Provider { .. }
        ));
    }

    #[test]
    fn test_map_invalid_argument_is_provider_error() {
        let err = map_openai_error(OpenAIError::InvalidArgument("bad arg".to_string()));
        assert!(matches!(err, LlmError::Provider { message } if message.contains("bad arg")));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, String::new()), LlmError::RateLimited { .. }));
        assert!(matches!(classify_status(400, String::new()), LlmError::BadRequest { .. }));
        assert!(matches!(classify_status(403, String::new()), LlmError::Unauthorized { .. }));
        assert!(matches!(classify_status(503, String::new()), LlmError::ServerError { .. }));
        assert!(matches!(classify_status(418, String::new()), LlmError::Provider { .. }));
    }

    #[test]
    fn test_status_and_truncation_detection() {
        assert_eq!(
            status_in_message("Invalid status code: 429 Too Many Requests"),
            Some(429)
        );
        assert_eq!(status_in_message("Transport error"), None);
        assert!(is_truncation("error decoding response body: unexpected EOF"));
        assert!(is_truncation("Response ended prematurely"));
        assert!(!is_truncation("dns error"));
    }
}
