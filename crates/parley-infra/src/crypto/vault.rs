//! AES-256-GCM vault encryption for guild API keys at rest.
//!
//! VaultCrypto provides symmetric encryption using AES-256-GCM with random nonces.
//! The master key can come from:
//! - A raw 32-byte key
//! - A key file in the data directory (auto-generated, the default)
//! - The OS keychain (auto-generated)
//! - A password (Argon2id key derivation)
//!
//! Encrypted format: `nonce (12 bytes) || ciphertext`
//!
//! SECURITY: Error types never contain plaintext or key material.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use secrecy::SecretString;
use thiserror::Error;

use parley_core::repository::credential::CredentialCipher;
use parley_types::config::VaultKeySource;
use parley_types::error::CredentialError;

/// Nonce size for AES-256-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Service name used for keychain storage of the master key.
const KEYCHAIN_SERVICE: &str = "parley";
/// Keychain user/account for the vault master key.
const KEYCHAIN_USER: &str = "vault-master-key";

/// File name of the master key inside the data directory.
pub const KEY_FILE_NAME: &str = "vault.key";

/// Environment variable holding the vault password for [`VaultKeySource::Password`].
pub const PASSWORD_ENV: &str = "PARLEY_VAULT_PASSWORD";

/// Errors from vault encryption operations.
///
/// IMPORTANT: These errors never include plaintext, key material, or ciphertext
/// in their Display/Debug output to prevent accidental logging of secrets.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid ciphertext: too short")]
    CiphertextTooShort,

    #[error("key derivation failed")]
    KeyDerivationFailed,

    #[error("vault password not set (export {PASSWORD_ENV})")]
    PasswordMissing,

    #[error("key file error: {0}")]
    KeyFile(String),

    #[error("keychain unavailable: {0}")]
    KeychainUnavailable(String),

    #[error("keychain error: {0}")]
    KeychainError(String),
}

/// AES-256-GCM encryption for guild API keys at rest.
///
/// Each encryption call generates a random 12-byte nonce, prepended to the ciphertext.
/// This means encrypting the same plaintext twice produces different output.
pub struct VaultCrypto {
    cipher: Aes256Gcm,
}

impl VaultCrypto {
    /// Create a new VaultCrypto from a raw 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Build the vault from the configured key source.
    pub fn from_source(source: VaultKeySource, data_dir: &Path) -> Result<Self, VaultError> {
        match source {
            VaultKeySource::File => Self::from_key_file(&data_dir.join(KEY_FILE_NAME)),
            VaultKeySource::Keychain => Self::from_keychain(),
            VaultKeySource::Password => {
                let password =
                    std::env::var(PASSWORD_ENV).map_err(|_| VaultError::PasswordMissing)?;
                Self::from_password(&password)
            }
        }
    }

    /// Derive a 32-byte encryption key from a password using Argon2id.
    ///
    /// Uses OWASP recommended parameters (19 MiB memory, 2 iterations, 1 lane).
    /// The salt is fixed so the same password always yields the same key; the
    /// derived key is used for encryption only, never stored.
    pub fn from_password(password: &str) -> Result<Self, VaultError> {
        use argon2::{Algorithm, Argon2, Params, Version};

        let params = Params::new(19456, 2, 1, Some(32))
            .map_err(|_| VaultError::KeyDerivationFailed)?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = b"parley-vault-v1";
        let mut key = [0u8; 32];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|_| VaultError::KeyDerivationFailed)?;

        Ok(Self::new(&key))
    }

    /// Load the master key from a hex file, generating it on first use.
    ///
    /// A new file is created with owner-only permissions on Unix.
    pub fn from_key_file(path: &Path) -> Result<Self, VaultError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let key = decode_key(contents.trim())
                    .map_err(|_| VaultError::KeyFile("corrupted key file".to_string()))?;
                Ok(Self::new(&key))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key: [u8; 32] = rand_bytes();
                write_key_file(path, &hex_encode(&key))?;
                tracing::info!(path = %path.display(), "generated new vault key file");
                Ok(Self::new(&key))
            }
            Err(e) => Err(VaultError::KeyFile(e.to_string())),
        }
    }

    /// Load or auto-generate a master key from the OS keychain.
    ///
    /// The key is stored as a hex string (64 chars) under service "parley".
    pub fn from_keychain() -> Result<Self, VaultError> {
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_USER)
            .map_err(|e| VaultError::KeychainUnavailable(e.to_string()))?;

        match entry.get_password() {
            Ok(hex_key) => {
                let key = decode_key(&hex_key).map_err(|_| {
                    VaultError::KeychainError("corrupted key in keychain".to_string())
                })?;
                Ok(Self::new(&key))
            }
            Err(keyring::Error::NoEntry) => {
                let key: [u8; 32] = rand_bytes();
                entry
                    .set_password(&hex_encode(&key))
                    .map_err(|e| VaultError::KeychainError(e.to_string()))?;
                Ok(Self::new(&key))
            }
            Err(e) => Err(VaultError::KeychainUnavailable(e.to_string())),
        }
    }

    /// Encrypt plaintext using AES-256-GCM with a random nonce.
    ///
    /// Returns `nonce (12 bytes) || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by `encrypt()`.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, VaultError> {
        if data.len() < NONCE_SIZE {
            return Err(VaultError::CiphertextTooShort);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)
    }
}

impl CredentialCipher for VaultCrypto {
    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CredentialError> {
        VaultCrypto::encrypt(self, plaintext.as_bytes()).map_err(|_| CredentialError::EncryptionFailed)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<SecretString, CredentialError> {
        let bytes =
            VaultCrypto::decrypt(self, ciphertext).map_err(|_| CredentialError::DecryptionFailed)?;
        let text = String::from_utf8(bytes).map_err(|_| CredentialError::DecryptionFailed)?;
        Ok(SecretString::from(text))
    }
}

fn write_key_file(path: &Path, hex_key: &str) -> Result<(), VaultError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VaultError::KeyFile(e.to_string()))?;
    }
    std::fs::write(path, hex_key).map_err(|e| VaultError::KeyFile(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| VaultError::KeyFile(e.to_string()))?;
    }
    Ok(())
}

/// Generate 32 random bytes using the OS CSPRNG.
fn rand_bytes() -> [u8; 32] {
    use aes_gcm::aead::rand_core::RngCore;
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

fn decode_key(hex_key: &str) -> Result<[u8; 32], String> {
    let bytes = hex_decode(hex_key)?;
    bytes
        .try_into()
        .map_err(|_| "invalid key length".to_string())
}

/// Hex-encode bytes to string.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Hex-decode a string to bytes.
fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd length hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .ok_or_else(|| format!("invalid hex at position {i}"))
                .and_then(|pair| {
                    u8::from_str_radix(pair, 16)
                        .map_err(|e| format!("invalid hex at position {i}: {e}"))
                })
        })
        .collect()
}
