//! Per-call encryption configuration.

use std::fmt;

use zeroize::Zeroizing;

use crate::cipher::Cipher;
use crate::error::{CryptoError, Result};

/// Encryption settings for one resolution call.
///
/// Encryption (the `protect` function and encrypted secret copies) and
/// decryption (expansion of `$ocm_encrypted:` values) are enabled
/// independently. Either one requires a 32-byte key and a 16-byte IV.
///
/// # Example
///
/// ```rust
/// use mantle_crypto::EncryptionConfig;
///
/// let config = EncryptionConfig::new([0u8; 32], [1u8; 16])
///     .with_encryption(true)
///     .with_decryption(true)
///     .with_decryption_concurrency(4);
///
/// let cipher = config.validate().unwrap();
/// assert!(cipher.is_some());
/// ```
#[derive(Clone, Default)]
pub struct EncryptionConfig {
    aes_key: Zeroizing<Vec<u8>>,
    aes_key_fallback: Zeroizing<Vec<u8>>,
    initialization_vector: Vec<u8>,
    decryption_concurrency: u8,
    encryption_enabled: bool,
    decryption_enabled: bool,
}

impl EncryptionConfig {
    /// Creates a configuration with key material and both modes disabled.
    pub fn new(aes_key: impl Into<Vec<u8>>, initialization_vector: impl Into<Vec<u8>>) -> Self {
        Self {
            aes_key: Zeroizing::new(aes_key.into()),
            initialization_vector: initialization_vector.into(),
            ..Self::default()
        }
    }

    /// Sets the key tried when the primary key cannot decrypt a value.
    pub fn with_fallback_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.aes_key_fallback = Zeroizing::new(key.into());
        self
    }

    /// Enables or disables the `protect` function and encrypted secret copies.
    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encryption_enabled = enabled;
        self
    }

    /// Enables or disables decryption of `$ocm_encrypted:` values.
    pub fn with_decryption(mut self, enabled: bool) -> Self {
        self.decryption_enabled = enabled;
        self
    }

    /// Sets how many workers may decrypt values at once. `0` behaves as `1`.
    pub fn with_decryption_concurrency(mut self, workers: u8) -> Self {
        self.decryption_concurrency = workers;
        self
    }

    /// Returns true if encryption is enabled.
    pub fn encryption_enabled(&self) -> bool {
        self.encryption_enabled
    }

    /// Returns true if decryption is enabled.
    pub fn decryption_enabled(&self) -> bool {
        self.decryption_enabled
    }

    /// Number of decryption workers, never less than one.
    pub fn decryption_concurrency(&self) -> usize {
        usize::from(self.decryption_concurrency.max(1))
    }

    /// Validates the key material.
    ///
    /// Returns `Ok(None)` when neither mode is enabled; key material is not
    /// inspected in that case.
    pub fn validate(&self) -> Result<Option<Cipher>> {
        if !self.encryption_enabled && !self.decryption_enabled {
            return Ok(None);
        }

        if self.aes_key.is_empty() {
            return Err(CryptoError::KeyNotSet);
        }
        if self.initialization_vector.is_empty() {
            return Err(CryptoError::IvNotSet);
        }

        let mut cipher = Cipher::new(&self.aes_key, &self.initialization_vector)?;
        if !self.aes_key_fallback.is_empty() {
            cipher = cipher.with_fallback_key(&self.aes_key_fallback)?;
        }

        Ok(Some(cipher))
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("aes_key_set", &!self.aes_key.is_empty())
            .field("aes_key_fallback_set", &!self.aes_key_fallback.is_empty())
            .field("initialization_vector_len", &self.initialization_vector.len())
            .field("decryption_concurrency", &self.decryption_concurrency)
            .field("encryption_enabled", &self.encryption_enabled)
            .field("decryption_enabled", &self.decryption_enabled)
            .finish()
    }
}
