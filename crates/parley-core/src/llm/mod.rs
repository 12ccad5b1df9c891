//! LLM provider abstractions for Parley.
//!
//! - `LlmProvider`: trait for concrete streaming provider implementations
//! - `ProviderFactory`: builds a provider for one guild's API key

pub mod factory;
pub mod provider;
