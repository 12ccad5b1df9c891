//! OpenAI SSE stream to [`StreamEvent`] adapter.
//!
//! Maps `async-openai`'s [`ChatCompletionResponseStream`] chunks to the
//! provider-agnostic [`StreamEvent`] enum defined in `parley-types`.
//!
//! A stream that ends before any choice reported a finish reason was cut
//! off mid-body and ends with [`LlmError::StreamTruncated`].

use futures_util::StreamExt;

use async_openai::types::chat::ChatCompletionResponseStream;

use parley_core::llm::provider::CompletionStream;
use parley_types::chat::Role;
use parley_types::llm::{LlmError, StreamEvent, TokenUsage};

use super::map_openai_error;

/// Map an async-openai [`ChatCompletionResponseStream`] to a stream of [`StreamEvent`]s.
///
/// Emits, in order of arrival:
/// 1. `Role` -- when the first delta announces the assistant role
/// 2. `TextDelta` -- for each non-empty content fragment
/// 3. `Usage` -- on the final chunk (requires `stream_options.include_usage`)
pub fn map_openai_stream(stream: ChatCompletionResponseStream) -> CompletionStream {
    Box::pin(async_stream::try_stream! {
        let mut stream = stream;
        let mut finished = false;

        while let Some(result) = stream.next().await {
            let chunk = result.map_err(map_openai_error)?;

            if let Some(usage) = chunk.usage.as_ref() {
                yield StreamEvent::Usage(TokenUsage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                });
            }

            for choice in &chunk.choices {
                if choice.delta.role.is_some() {
                    yield StreamEvent::Role { role: Role::Assistant };
                }

                if let Some(text) = choice.delta.content.as_ref().filter(|t| !t.is_empty()) {
                    yield StreamEvent::TextDelta { text: text.clone() };
                }

                if choice.finish_reason.is_some() {
                    finished = true;
                }
            }
        }

        if !finished {
            Err(LlmError::StreamTruncated(
                "stream closed before a finish reason was received".to_string(),
            ))?;
        }
    })
}
