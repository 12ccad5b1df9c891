//! LlmProvider trait definition.
//!
//! This is the core abstraction that all LLM providers implement. The only
//! operation Parley needs is a streamed completion, returned as a boxed
//! stream so the trait stays object-safe.

use std::pin::Pin;

use futures_util::Stream;

use parley_types::llm::{CompletionRequest, LlmError, StreamEvent};

/// Lazy sequence of stream events produced by one completion call.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>;

/// Trait for streaming LLM provider backends.
///
/// The returned stream does nothing until polled and is abandoned by simply
/// dropping it. Implementations live in parley-infra
/// (e.g., `OpenAiCompatibleProvider`).
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a streaming completion request. Returns a stream of events.
    fn stream(&self, request: CompletionRequest) -> CompletionStream;
}

/// Type-erased provider for runtime provider selection.
pub type BoxLlmProvider = Box<dyn LlmProvider>;
