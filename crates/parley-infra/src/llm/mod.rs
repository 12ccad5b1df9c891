//! LLM provider implementations.
//!
//! - `openai_compat`: streaming chat completions against any OpenAI-compatible endpoint

pub mod openai_compat;
