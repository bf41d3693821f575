//! Protected values: encryption on the way out, decryption on the way in.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mantle::{
    CryptoError, EncryptionConfig, ExecutionErrorKind, MemoryCluster, ResolveOptions, Resolver,
    TemplateError,
};
use mantle_crypto::{Cipher, PROTECTED_PREFIX};
use serde_json::json;

// ============================================================================
// Test helpers
// ============================================================================

const KEY: [u8; 32] = [7; 32];
const IV: [u8; 16] = [9; 16];

fn cipher() -> Cipher {
    Cipher::new(&KEY, &IV).unwrap()
}

fn resolver() -> Resolver {
    let cluster = MemoryCluster::new()
        .with_secret("team", "db", [("password", "hunter2"), ("user", "admin")]);
    Resolver::builder()
        .with_store(Arc::new(cluster))
        .build()
        .unwrap()
}

fn encrypting() -> ResolveOptions {
    ResolveOptions::new().with_encryption(EncryptionConfig::new(KEY, IV).with_encryption(true))
}

fn decrypting() -> ResolveOptions {
    ResolveOptions::new().with_encryption(EncryptionConfig::new(KEY, IV).with_decryption(true))
}

fn string_at<'a>(value: &'a serde_json::Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(|v| v.as_str()).unwrap()
}

// ============================================================================
// Encryption
// ============================================================================

#[test]
fn protect_encrypts_when_enabled() {
    let result = resolver()
        .resolve_template("p: '{{ \"s3cret\" | protect }}'\n", &json!({}), &encrypting())
        .unwrap();
    let protected = string_at(&result.resolved, "/p");
    assert!(protected.starts_with(PROTECTED_PREFIX));
    assert_eq!(cipher().decrypt(protected).unwrap(), "s3cret");
    assert!(result.has_sensitive_data);
}

#[test]
fn protect_of_empty_value_is_empty() {
    let result = resolver()
        .resolve_template("p: '{{ \"\" | protect }}'\n", &json!({}), &encrypting())
        .unwrap();
    assert_eq!(result.resolved, json!({"p": ""}));
}

#[test]
fn protect_fails_when_not_enabled() {
    let err = resolver()
        .resolve_template("p: '{{ protect(\"s3cret\") }}'\n", &json!({}), &ResolveOptions::new())
        .unwrap_err();
    let TemplateError::Execution(err) = err else {
        panic!("expected an execution error")
    };
    assert_eq!(err.kind(), ExecutionErrorKind::NotEnabled);
    assert_eq!(err.function(), Some("protect"));
}

#[test]
fn from_secret_is_encrypted_when_enabled() {
    let raw = "p: '{{ fromSecret(\"team\", \"db\", \"password\") }}'\n";
    let result = resolver()
        .resolve_template(raw, &json!({}), &encrypting())
        .unwrap();
    let protected = string_at(&result.resolved, "/p");
    assert_eq!(cipher().decrypt(protected).unwrap(), STANDARD.encode("hunter2"));
}

#[test]
fn copy_secret_data_values_are_encrypted_when_enabled() {
    let raw = "data: '{{ copySecretData(\"team\", \"db\") }}'\n";
    let result = resolver()
        .resolve_template(raw, &json!({}), &encrypting())
        .unwrap();
    assert_eq!(
        cipher().decrypt(string_at(&result.resolved, "/data/password")).unwrap(),
        STANDARD.encode("hunter2")
    );
    assert_eq!(
        cipher().decrypt(string_at(&result.resolved, "/data/user")).unwrap(),
        STANDARD.encode("admin")
    );
}

#[test]
fn missing_key_material_is_rejected() {
    let options = ResolveOptions::new().with_encryption(EncryptionConfig::default().with_encryption(true));
    let err = resolver()
        .resolve_template("a: 1\n", &json!({}), &options)
        .unwrap_err();
    assert_eq!(err, TemplateError::Crypto(CryptoError::KeyNotSet));
}

#[test]
fn short_key_is_rejected() {
    let options = ResolveOptions::new()
        .with_encryption(EncryptionConfig::new([1u8; 10], IV).with_encryption(true));
    let err = resolver()
        .resolve_template("a: 1\n", &json!({}), &options)
        .unwrap_err();
    assert!(err.crypto_error().is_some());
}

// ============================================================================
// Decryption
// ============================================================================

#[test]
fn protected_values_are_decrypted() {
    let raw = format!(
        "user: {}\npassword: '{}'\n",
        cipher().protect("admin").unwrap(),
        cipher().protect("hunter2").unwrap()
    );
    let result = resolver()
        .resolve_template(&raw, &json!({}), &decrypting())
        .unwrap();
    assert_eq!(result.resolved, json!({"user": "admin", "password": "hunter2"}));
    assert!(result.has_sensitive_data);
}

#[test]
fn protected_values_stay_when_decryption_is_off() {
    let protected = cipher().protect("admin").unwrap();
    let raw = format!("user: {}\n", protected);
    let result = resolver()
        .resolve_template(&raw, &json!({}), &ResolveOptions::new())
        .unwrap();
    assert_eq!(result.resolved, json!({"user": protected}));
    assert!(!result.has_sensitive_data);
}

#[test]
fn many_values_decrypt_in_parallel() {
    let mut raw = String::new();
    let mut expected = serde_json::Map::new();
    for i in 0..40 {
        raw.push_str(&format!("k{}: {}\n", i, cipher().protect(&format!("value-{}", i)).unwrap()));
        expected.insert(format!("k{}", i), json!(format!("value-{}", i)));
    }
    let options = ResolveOptions::new().with_encryption(
        EncryptionConfig::new(KEY, IV)
            .with_decryption(true)
            .with_decryption_concurrency(8),
    );
    let result = resolver()
        .resolve_template(&raw, &json!({}), &options)
        .unwrap();
    assert_eq!(result.resolved, serde_json::Value::Object(expected));
}

#[test]
fn undecryptable_value_fails_with_its_line() {
    let raw = format!(
        "ok: {}\nbad: {}AAAA\n",
        cipher().protect("fine").unwrap(),
        PROTECTED_PREFIX
    );
    let err = resolver()
        .resolve_template(&raw, &json!({}), &decrypting())
        .unwrap_err();
    assert!(err.crypto_error().is_some());
    let TemplateError::Execution(err) = err else {
        panic!("expected an execution error")
    };
    assert_eq!(err.function(), Some("decrypt"));
    assert_eq!(err.line(), Some(2));
}

#[test]
fn marker_without_payload_fails_with_its_line() {
    let raw = format!(
        "ok: {}\nbad: '{}***'\n",
        cipher().protect("fine").unwrap(),
        PROTECTED_PREFIX
    );
    let err = resolver()
        .resolve_template(&raw, &json!({}), &decrypting())
        .unwrap_err();
    assert_eq!(
        err.crypto_error(),
        Some(&CryptoError::InvalidBase64("***'".into()))
    );
    let TemplateError::Execution(err) = err else {
        panic!("expected an execution error")
    };
    assert_eq!(err.function(), Some("decrypt"));
    assert_eq!(err.line(), Some(2));

    let raw = format!("bad: '{}***'\n", PROTECTED_PREFIX);
    let result = resolver()
        .resolve_template(&raw, &json!({}), &ResolveOptions::new())
        .unwrap();
    assert_eq!(result.resolved, json!({"bad": format!("{}***", PROTECTED_PREFIX)}));
}

#[test]
fn protected_values_with_hub_delimiters() {
    let raw = format!("v: {}\n", cipher().protect("hub-secret").unwrap());
    let resolver = Resolver::builder()
        .with_store(Arc::new(MemoryCluster::new()))
        .with_config(mantle::Config::hub())
        .build()
        .unwrap();
    let result = resolver
        .resolve_template(&raw, &json!({}), &decrypting())
        .unwrap();
    assert_eq!(result.resolved, json!({"v": "hub-secret"}));
}
