//! # Mantle Crypto - Protected Values for Policy Templates
//!
//! Symmetric protection of sensitive values embedded in policy manifests.
//!
//! A protected value is AES-256-CBC ciphertext, PKCS7-padded, base64-encoded
//! and prefixed with `$ocm_encrypted:`. Manifests carrying such values can be
//! stored and distributed; only a resolver holding the key can expand them.
//!
//! ## Components
//!
//! - [`EncryptionConfig`]: per-call settings (keys, IV, modes, worker count)
//! - [`Cipher`]: validated key material that protects and decrypts values
//! - [`marker`]: finding and rewriting `$ocm_encrypted:` tokens in raw text
//! - [`decrypt_all`] / [`decrypt_distinct`]: bounded parallel decryption
//!
//! ## Example
//!
//! ```rust
//! use mantle_crypto::{marker, EncryptionConfig};
//!
//! let config = EncryptionConfig::new([3u8; 32], [4u8; 16]).with_decryption(true);
//! let cipher = config.validate().unwrap().unwrap();
//!
//! let manifest = format!("password: {}\n", cipher.protect("s3cret").unwrap());
//! let tokens = marker::find_tokens(&manifest);
//! assert_eq!(tokens.len(), 1);
//! assert_eq!(cipher.decrypt(tokens[0].payload).unwrap(), "s3cret");
//! ```

pub mod cipher;
pub mod config;
pub mod error;
pub mod marker;
pub mod pool;

pub use cipher::{Cipher, BLOCK_SIZE, IV_SIZE, KEY_SIZE};
pub use config::EncryptionConfig;
pub use error::{CryptoError, Result};
pub use marker::{
    contains_marker, find_bare_marker, find_tokens, replace_tokens, EncryptedToken, PROTECTED_PREFIX,
};
pub use pool::{decrypt_all, decrypt_distinct};
