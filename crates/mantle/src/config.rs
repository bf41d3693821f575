//! Resolver-wide configuration.
//!
//! A [`Config`] is fixed for the lifetime of a [`Resolver`](crate::Resolver).
//! It can be built in code or loaded from YAML:
//!
//! ```yaml
//! startDelim: "{{hub"
//! stopDelim: "hub}}"
//! disabledFunctions: [lookup]
//! additionalIndentation: 2
//! missingApiResourceCacheTtl: 30
//! ```
//!
//! The TTL is given in seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{TemplateError, ValidationError};

/// Default expression start delimiter.
pub const DEFAULT_START_DELIM: &str = "{{";
/// Default expression stop delimiter.
pub const DEFAULT_STOP_DELIM: &str = "}}";
/// Start delimiter of hub templates.
pub const HUB_START_DELIM: &str = "{{hub";
/// Stop delimiter of hub templates.
pub const HUB_STOP_DELIM: &str = "hub}}";

/// Settings shared by every resolution call of one resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Expression start delimiter; empty means `{{`.
    pub start_delim: String,
    /// Expression stop delimiter; empty means `}}`.
    pub stop_delim: String,
    /// Built-in and engine functions removed from every template.
    pub disabled_functions: Vec<String>,
    /// Subtracted from the column of an `autoindent` expression.
    pub additional_indentation: u32,
    /// How long a missing API resource type is remembered; zero disables it.
    #[serde(
        serialize_with = "serialize_seconds",
        deserialize_with = "deserialize_seconds"
    )]
    pub missing_api_resource_cache_ttl: Duration,
}

impl Config {
    /// Configuration for resolving hub templates (`{{hub ... hub}}`).
    pub fn hub() -> Self {
        Self {
            start_delim: HUB_START_DELIM.to_string(),
            stop_delim: HUB_STOP_DELIM.to_string(),
            ..Self::default()
        }
    }

    /// Parses a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, TemplateError> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| ValidationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ValidationError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    /// Checks that the delimiters are either both set or both empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.start_delim.is_empty() != self.stop_delim.is_empty() {
            return Err(ValidationError::DelimiterPairing);
        }
        Ok(())
    }

    /// The effective `(start, stop)` expression delimiters.
    pub fn delimiters(&self) -> (&str, &str) {
        if self.start_delim.is_empty() {
            (DEFAULT_START_DELIM, DEFAULT_STOP_DELIM)
        } else {
            (&self.start_delim, &self.stop_delim)
        }
    }

    /// Returns true when the effective delimiters are `{{` and `}}`.
    pub fn uses_default_delimiters(&self) -> bool {
        self.delimiters() == (DEFAULT_START_DELIM, DEFAULT_STOP_DELIM)
    }
}

fn serialize_seconds<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(ttl.as_secs())
}

fn deserialize_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_delimiters() {
        let config = Config::default();
        assert_eq!(config.delimiters(), ("{{", "}}"));
        assert!(config.uses_default_delimiters());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hub_delimiters() {
        let config = Config::hub();
        assert_eq!(config.delimiters(), ("{{hub", "hub}}"));
        assert!(!config.uses_default_delimiters());
    }

    #[test]
    fn test_explicit_default_delimiters_count_as_default() {
        let config = Config {
            start_delim: "{{".into(),
            stop_delim: "}}".into(),
            ..Config::default()
        };
        assert!(config.uses_default_delimiters());
    }

    #[test]
    fn test_delimiters_must_pair() {
        let config = Config {
            start_delim: "{{hub".into(),
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::DelimiterPairing));
    }

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml(
            "startDelim: '{{hub'\nstopDelim: 'hub}}'\ndisabledFunctions: [lookup]\n\
             additionalIndentation: 2\nmissingApiResourceCacheTtl: 30\n",
        )
        .unwrap();
        assert_eq!(config.delimiters(), ("{{hub", "hub}}"));
        assert_eq!(config.disabled_functions, vec!["lookup".to_string()]);
        assert_eq!(config.additional_indentation, 2);
        assert_eq!(config.missing_api_resource_cache_ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_from_yaml_rejects_unpaired_delimiters() {
        let err = Config::from_yaml("stopDelim: 'hub}}'\n").unwrap_err();
        assert_eq!(
            err,
            TemplateError::Validation(ValidationError::DelimiterPairing)
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "additionalIndentation: 4").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.additional_indentation, 4);
        assert!(config.uses_default_delimiters());
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/nonexistent/mantle.yaml").unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Validation(ValidationError::Config(_))
        ));
    }
}
