//! AES-256-CBC protection with PKCS7 padding.
//!
//! [`Cipher`] is the validated form of an encryption configuration: a 256-bit
//! primary key, an optional 256-bit fallback key and a 128-bit initialization
//! vector.
//!
//! # Deterministic Output
//!
//! The initialization vector is fixed per configuration, so protecting the same
//! plaintext twice yields the same ciphertext. Manifests are reconciled by
//! diffing, and a value that re-encrypts differently on every pass would show
//! up as a perpetual change. This gives up semantic security: equal plaintexts
//! are recognizable as equal. Do not change it to a random IV.
//!
//! # Wire Format
//!
//! ```text
//! $ocm_encrypted:<base64(AES-256-CBC(PKCS7(plaintext)))>
//! ```
//!
//! # Example
//!
//! ```rust
//! use mantle_crypto::Cipher;
//!
//! let cipher = Cipher::new(&[7u8; 32], &[9u8; 16]).unwrap();
//! let protected = cipher.protect("hunter2").unwrap();
//! assert!(protected.starts_with("$ocm_encrypted:"));
//! assert_eq!(cipher.decrypt(&protected).unwrap(), "hunter2");
//! ```

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::marker::PROTECTED_PREFIX;

/// Cipher block size in bytes (AES).
pub const BLOCK_SIZE: usize = 16;

/// Required AES key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Required initialization vector size in bytes.
pub const IV_SIZE: usize = BLOCK_SIZE;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Validated key material able to protect and decrypt values.
///
/// Key bytes are zeroed when the cipher is dropped.
#[derive(Clone)]
pub struct Cipher {
    key: Zeroizing<Vec<u8>>,
    fallback_key: Option<Zeroizing<Vec<u8>>>,
    iv: [u8; IV_SIZE],
}

impl Cipher {
    /// Creates a cipher from a 32-byte key and a 16-byte initialization vector.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        let iv: [u8; IV_SIZE] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvLength(iv.len()))?;

        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
            fallback_key: None,
            iv,
        })
    }

    /// Adds a fallback key, tried when the primary key fails padding validation.
    ///
    /// This lets values protected before a key rotation keep decrypting.
    pub fn with_fallback_key(mut self, key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidFallbackKeyLength(key.len()));
        }
        self.fallback_key = Some(Zeroizing::new(key.to_vec()));
        Ok(self)
    }

    /// Returns true if a fallback key is configured.
    pub fn has_fallback_key(&self) -> bool {
        self.fallback_key.is_some()
    }

    /// Encrypts `plaintext` and returns it base64-encoded behind the marker.
    ///
    /// An empty plaintext yields an empty string with no marker.
    pub fn protect(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let padded = pkcs7_pad(plaintext.as_bytes());
        let encryptor = Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
            .map_err(|_| CryptoError::InvalidKeyLength(self.key.len()))?;
        let ciphertext = encryptor.encrypt_padded_vec_mut::<NoPadding>(&padded);

        Ok(format!("{}{}", PROTECTED_PREFIX, STANDARD.encode(ciphertext)))
    }

    /// Decrypts a protected value.
    ///
    /// The marker prefix is optional; the encrypted-value rewrite passes bare
    /// base64. When the primary key fails padding validation and a fallback key
    /// is configured, the fallback key is tried before giving up.
    pub fn decrypt(&self, value: &str) -> Result<String> {
        let encoded = value.strip_prefix(PROTECTED_PREFIX).unwrap_or(value);
        let ciphertext = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;

        let plaintext = match self.decrypt_with_key(&self.key, &ciphertext) {
            Err(err) if err.is_padding() => match &self.fallback_key {
                Some(fallback) => {
                    tracing::debug!("primary key failed padding validation, trying fallback key");
                    self.decrypt_with_key(fallback, &ciphertext)?
                }
                None => return Err(err),
            },
            other => other?,
        };

        Ok(String::from_utf8_lossy(&plaintext).into_owned())
    }

    fn decrypt_with_key(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidCiphertextLength(ciphertext.len()));
        }

        let decryptor = Aes256CbcDec::new_from_slices(key, &self.iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        let decrypted = decryptor
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|_| CryptoError::InvalidCiphertextLength(ciphertext.len()))?;

        let unpadded_len = pkcs7_unpad(&decrypted)?.len();
        let mut plaintext = decrypted;
        plaintext.truncate(unpadded_len);
        Ok(plaintext)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("key", &"<redacted>")
            .field("fallback_key", &self.fallback_key.as_ref().map(|_| "<redacted>"))
            .field("iv", &"<redacted>")
            .finish()
    }
}

/// Pads `data` to a whole number of blocks using PKCS7.
///
/// A full block of padding is appended when `data` is already block aligned.
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let padding = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + padding);
    padded.extend_from_slice(data);
    padded.resize(data.len() + padding, padding as u8);
    padded
}

/// Strips PKCS7 padding, validating both the length byte and every padding byte.
pub fn pkcs7_unpad(data: &[u8]) -> Result<&[u8]> {
    let Some(&last) = data.last() else {
        return Err(CryptoError::InvalidPaddingLength(0));
    };

    let padding = last as usize;
    if padding == 0 || padding > BLOCK_SIZE || padding > data.len() {
        return Err(CryptoError::InvalidPaddingLength(padding));
    }

    let (content, pad) = data.split_at(data.len() - padding);
    if pad.iter().any(|&b| b as usize != padding) {
        return Err(CryptoError::InvalidPaddingBytes);
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [1; 32];
    const OTHER_KEY: [u8; 32] = [2; 32];
    const IV: [u8; 16] = [3; 16];

    #[test]
    fn test_rejects_bad_key_and_iv_sizes() {
        assert_eq!(
            Cipher::new(&[0; 16], &IV).unwrap_err(),
            CryptoError::InvalidKeyLength(16)
        );
        assert_eq!(
            Cipher::new(&KEY, &[0; 8]).unwrap_err(),
            CryptoError::InvalidIvLength(8)
        );
        assert_eq!(
            Cipher::new(&KEY, &IV)
                .unwrap()
                .with_fallback_key(&[0; 31])
                .unwrap_err(),
            CryptoError::InvalidFallbackKeyLength(31)
        );
    }

    #[test]
    fn test_protect_empty_is_empty() {
        let cipher = Cipher::new(&KEY, &IV).unwrap();
        assert_eq!(cipher.protect("").unwrap(), "");
    }

    #[test]
    fn test_protect_is_deterministic() {
        let cipher = Cipher::new(&KEY, &IV).unwrap();
        let a = cipher.protect("value").unwrap();
        let b = cipher.protect("value").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(PROTECTED_PREFIX));
    }

    #[test]
    fn test_decrypt_accepts_bare_base64() {
        let cipher = Cipher::new(&KEY, &IV).unwrap();
        let protected = cipher.protect("bare").unwrap();
        let bare = protected.strip_prefix(PROTECTED_PREFIX).unwrap();
        assert_eq!(cipher.decrypt(bare).unwrap(), "bare");
    }

    #[test]
    fn test_decrypt_invalid_base64() {
        let cipher = Cipher::new(&KEY, &IV).unwrap();
        let err = cipher.decrypt("$ocm_encrypted:not*base64").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidBase64(_)));
    }

    #[test]
    fn test_decrypt_partial_block() {
        let cipher = Cipher::new(&KEY, &IV).unwrap();
        let err = cipher.decrypt("YWJj").unwrap_err();
        assert_eq!(err, CryptoError::InvalidCiphertextLength(3));
    }

    #[test]
    fn test_fallback_key_decrypts_old_values() {
        let old = Cipher::new(&OTHER_KEY, &IV).unwrap();
        let protected = old.protect("rotated secret").unwrap();

        let rotated = Cipher::new(&KEY, &IV)
            .unwrap()
            .with_fallback_key(&OTHER_KEY)
            .unwrap();
        assert_eq!(rotated.decrypt(&protected).unwrap(), "rotated secret");
    }

    #[test]
    fn test_pad_block_aligned_adds_full_block() {
        let padded = pkcs7_pad(&[0u8; 16]);
        assert_eq!(padded.len(), 32);
        assert!(padded[16..].iter().all(|&b| b == 16));
    }

    #[test]
    fn test_unpad_length_errors() {
        assert_eq!(pkcs7_unpad(&[]).unwrap_err(), CryptoError::InvalidPaddingLength(0));

        let mut zero = [4u8; 16];
        zero[15] = 0;
        assert_eq!(pkcs7_unpad(&zero).unwrap_err(), CryptoError::InvalidPaddingLength(0));

        let mut too_long = [4u8; 16];
        too_long[15] = 17;
        assert_eq!(
            pkcs7_unpad(&too_long).unwrap_err(),
            CryptoError::InvalidPaddingLength(17)
        );
    }

    #[test]
    fn test_unpad_byte_errors() {
        let mut data = [4u8; 16];
        data[13] = 9;
        assert_eq!(pkcs7_unpad(&data).unwrap_err(), CryptoError::InvalidPaddingBytes);
    }

    #[test]
    fn test_unpad_valid() {
        let mut data = vec![b'a'; 13];
        data.extend_from_slice(&[3, 3, 3]);
        assert_eq!(pkcs7_unpad(&data).unwrap(), b"aaaaaaaaaaaaa");
    }

    #[test]
    fn test_debug_redacts_keys() {
        let cipher = Cipher::new(&KEY, &IV).unwrap();
        let debug = format!("{:?}", cipher);
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("[1, 1"));
    }
}
