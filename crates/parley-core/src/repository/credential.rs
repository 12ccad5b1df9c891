//! Guild credential storage and the cipher protecting it.

use secrecy::SecretString;

use parley_types::credential::GuildCredential;
use parley_types::error::{CredentialError, RepositoryError};

/// Prefix every provider API key carries.
pub const API_KEY_PREFIX: &str = "sk-";

/// Shortest key accepted; anything shorter is a typo or a truncated paste.
pub const API_KEY_MIN_LEN: usize = 20;

/// Persistent storage for encrypted per-guild API keys.
pub trait CredentialRepository: Send + Sync {
    fn list_all(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<GuildCredential>, RepositoryError>> + Send;

    fn get(
        &self,
        guild_id: u64,
    ) -> impl std::future::Future<Output = Result<Option<GuildCredential>, RepositoryError>> + Send;

    /// Store (or replace) the encrypted key for a guild.
    fn set(
        &self,
        guild_id: u64,
        encrypted_key: &[u8],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Returns whether a credential was removed.
    fn delete(
        &self,
        guild_id: u64,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}

/// Symmetric encryption of API keys at rest.
///
/// Implemented by the vault in parley-infra. Synchronous and object-safe so
/// it can be shared as `Arc<dyn CredentialCipher>`.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CredentialError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<SecretString, CredentialError>;
}

/// Whether `key` has the shape of a provider API key.
pub fn is_plausible_api_key(key: &str) -> bool {
    let key = key.trim();
    key.starts_with(API_KEY_PREFIX)
        && key.len() >= API_KEY_MIN_LEN
        && !key.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plausible_api_key() {
        assert!(is_plausible_api_key("sk-abcdefghijklmnopqrstuvwxyz"));
        assert!(is_plausible_api_key("  sk-proj-0123456789abcdef  "));
    }

    #[test]
    fn test_implausible_api_keys() {
        assert!(!is_plausible_api_key(""));
        assert!(!is_plausible_api_key("sk-short"));
        assert!(!is_plausible_api_key("pk-abcdefghijklmnopqrstuvwxyz"));
        assert!(!is_plausible_api_key("sk-abcdefghij klmnopqrstuvwxyz"));
    }
}
