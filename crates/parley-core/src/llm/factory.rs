use secrecy::SecretString;

use parley_types::llm::LlmError;

use super::provider::BoxLlmProvider;

/// Builds a provider bound to one guild's API key.
///
/// Called once per exchange; the coordinator never caches providers so a
/// rotated key takes effect on the next message.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, api_key: &SecretString) -> Result<BoxLlmProvider, LlmError>;
}
