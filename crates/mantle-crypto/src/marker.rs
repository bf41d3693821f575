//! Detection of encrypted-value markers in raw text.
//!
//! Protected values are embedded in manifests as `$ocm_encrypted:` followed by
//! standard base64. Only the base64 alphabet is consumed after the marker, so
//! trailing bytes that are not base64 are left in place instead of being
//! swallowed into the token.

use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix that marks a protected value.
pub const PROTECTED_PREFIX: &str = "$ocm_encrypted:";

static ENCRYPTED_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$ocm_encrypted:([a-zA-Z0-9+/=]+)").unwrap());

/// A protected value found in text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedToken<'a> {
    /// Byte range of the whole token, marker included.
    pub range: std::ops::Range<usize>,
    /// The base64 payload after the marker.
    pub payload: &'a str,
}

/// Returns true if `text` contains the encrypted-value marker.
pub fn contains_marker(text: &str) -> bool {
    text.contains(PROTECTED_PREFIX)
}

/// Finds every marker followed by at least one base64 character.
///
/// A marker with nothing decodable after it is not reported.
pub fn find_tokens(text: &str) -> Vec<EncryptedToken<'_>> {
    ENCRYPTED_TOKEN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let payload = caps.get(1)?;
            Some(EncryptedToken {
                range: whole.range(),
                payload: payload.as_str(),
            })
        })
        .collect()
}

/// Returns the offset of the first marker with no base64 payload after it.
pub fn find_bare_marker(text: &str) -> Option<usize> {
    text.match_indices(PROTECTED_PREFIX)
        .map(|(offset, _)| offset)
        .find(|&offset| !text[offset + PROTECTED_PREFIX.len()..].starts_with(is_base64_char))
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')
}

/// Replaces every token in `text` with the output of `replace(payload)`.
pub fn replace_tokens<F>(text: &str, mut replace: F) -> String
where
    F: FnMut(&str) -> String,
{
    ENCRYPTED_TOKEN
        .replace_all(text, |caps: &regex::Captures<'_>| replace(&caps[1]))
        .into_owned()
}
