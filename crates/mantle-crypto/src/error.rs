//! Error types for the crypto crate.

use thiserror::Error;

/// Errors produced while validating key material or protecting/decrypting values.
///
/// Each failure mode is its own variant so callers can tell a misconfigured
/// resolver (key or IV problems) apart from a corrupted value (base64 or
/// padding problems).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Encryption or decryption was enabled without an AES key.
    #[error("the AES key must be set to use this encryption mode")]
    KeyNotSet,

    /// The primary AES key is not 256 bits.
    #[error("the AES key is invalid: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The fallback AES key is not 256 bits.
    #[error("the fallback AES key is invalid: expected 32 bytes, got {0}")]
    InvalidFallbackKeyLength(usize),

    /// Encryption or decryption was enabled without an initialization vector.
    #[error("the initialization vector must be set to use this encryption mode")]
    IvNotSet,

    /// The initialization vector does not match the cipher block size.
    #[error("the initialization vector is invalid: expected 16 bytes, got {0}")]
    InvalidIvLength(usize),

    /// The text after the encryption marker is not valid base64.
    #[error("the encrypted string is invalid base64: {0}")]
    InvalidBase64(String),

    /// The decoded ciphertext is empty or not a whole number of blocks.
    #[error("the encrypted value has an invalid length of {0} bytes")]
    InvalidCiphertextLength(usize),

    /// The final padding byte announces an impossible padding length.
    #[error("the decrypted value has an invalid PKCS7 padding length of {0}")]
    InvalidPaddingLength(usize),

    /// The padding bytes do not all equal the padding length.
    #[error("the decrypted value has invalid PKCS7 padding bytes")]
    InvalidPaddingBytes,
}

impl CryptoError {
    /// Whether this error came from padding validation.
    ///
    /// A padding failure is what a wrong key produces, so it is the only
    /// failure that warrants a retry with the fallback key.
    pub fn is_padding(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidPaddingLength(_) | CryptoError::InvalidPaddingBytes
        )
    }
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_classification() {
        assert!(CryptoError::InvalidPaddingLength(0).is_padding());
        assert!(CryptoError::InvalidPaddingBytes.is_padding());
        assert!(!CryptoError::InvalidBase64("x".into()).is_padding());
        assert!(!CryptoError::InvalidCiphertextLength(3).is_padding());
    }

    #[test]
    fn test_error_display_names_sizes() {
        let err = CryptoError::InvalidKeyLength(16);
        assert!(err.to_string().contains("32 bytes"));
        assert!(err.to_string().contains("16"));
    }
}
