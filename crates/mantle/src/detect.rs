//! Checks on raw templates that never execute them.

use regex::Regex;

use crate::config::{DEFAULT_START_DELIM, DEFAULT_STOP_DELIM};

/// Returns true if `raw` contains the start delimiter, or an encrypted
/// marker when `check_encrypted` is set.
///
/// An empty `start_delim` means the default `{{`.
///
/// ```rust
/// use mantle::detect::has_template;
///
/// assert!(has_template("a: '{{ 1 }}'", "", false));
/// assert!(!has_template("a: '{{ 1 }}'", "{{hub", false));
/// assert!(has_template("a: $ocm_encrypted:QUJD", "", true));
/// assert!(!has_template("a: $ocm_encrypted:QUJD", "", false));
/// ```
pub fn has_template(raw: &str, start_delim: &str, check_encrypted: bool) -> bool {
    let start = if start_delim.is_empty() {
        DEFAULT_START_DELIM
    } else {
        start_delim
    };
    raw.contains(start) || (check_encrypted && mantle_crypto::contains_marker(raw))
}

/// Returns true if executing `raw` could produce encrypted output: an
/// expression calls `fromSecret`, `copySecretData` or `protect`, or pipes
/// into `protect`.
///
/// Empty delimiters mean the defaults.
///
/// ```rust
/// use mantle::detect::uses_encryption;
///
/// assert!(uses_encryption(r#"p: '{{ fromSecret("ns", "s", "k") }}'"#, "", ""));
/// assert!(uses_encryption("p: '{{ value | protect }}'", "", ""));
/// assert!(!uses_encryption("p: '{{ value | upper }}'", "", ""));
/// assert!(!uses_encryption(r#"fromSecret("ns", "s", "k")"#, "", ""));
/// ```
pub fn uses_encryption(raw: &str, start_delim: &str, stop_delim: &str) -> bool {
    let (start, stop) = if start_delim.is_empty() || stop_delim.is_empty() {
        (DEFAULT_START_DELIM, DEFAULT_STOP_DELIM)
    } else {
        (start_delim, stop_delim)
    };
    let pattern = format!(
        r"{}[^\n]*?(?:\b(?:fromSecret|copySecretData|protect)\s*\(|\|\s*protect\b)[^\n]*?{}",
        regex::escape(start),
        regex::escape(stop)
    );
    Regex::new(&pattern).is_ok_and(|re| re.is_match(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_template_custom_delimiter() {
        assert!(has_template("a: '{{hub 1 hub}}'", "{{hub", false));
        assert!(!has_template("plain: value\n", "", true));
    }

    #[test]
    fn test_uses_encryption_variants() {
        assert!(uses_encryption(
            "data: '{{ copySecretData(\"ns\", \"s\") }}'",
            "",
            ""
        ));
        assert!(uses_encryption("x: '{{ protect(\"v\") }}'", "", ""));
        assert!(uses_encryption("x: '{{- \"v\" | protect -}}'", "", ""));
        assert!(!uses_encryption(
            "x: '{{ fromConfigMap(\"ns\", \"c\", \"k\") }}'",
            "",
            ""
        ));
    }

    #[test]
    fn test_uses_encryption_respects_delimiters() {
        let raw = "x: '{{hub fromSecret(\"ns\", \"s\", \"k\") hub}}'";
        assert!(uses_encryption(raw, "{{hub", "hub}}"));
        assert!(!uses_encryption("x: '{{ protect(\"v\") }}'", "{{hub", "hub}}"));
    }

    #[test]
    fn test_protect_name_must_be_whole_word() {
        assert!(!uses_encryption("x: '{{ unprotect(\"v\") }}'", "", ""));
        assert!(!uses_encryption("x: '{{ v | protected }}'", "", ""));
    }
}
