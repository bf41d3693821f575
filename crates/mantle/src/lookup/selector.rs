//! Label selector parsing and matching.
//!
//! Supported requirement forms:
//!
//! | form | matches when |
//! |------|--------------|
//! | `k=v`, `k==v` | label `k` equals `v` |
//! | `k!=v` | label `k` is absent or differs from `v` |
//! | `k` | label `k` exists |
//! | `!k` | label `k` does not exist |
//! | `k in (a,b)` | label `k` is one of the values |
//! | `k notin (a,b)` | label `k` is absent or none of the values |
//!
//! Requirements are separated by commas; several selector strings are AND-ed.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::LookupError;

static SET_REQUIREMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<key>[^\s!=(),]+)\s+(?P<op>in|notin)\s*\((?P<values>[^()]*)\)$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches<'a>(&self, mut label: impl FnMut(&str) -> Option<&'a str>) -> bool {
        match self {
            Requirement::Equals(k, v) => label(k.as_str()) == Some(v.as_str()),
            Requirement::NotEquals(k, v) => label(k.as_str()) != Some(v.as_str()),
            Requirement::In(k, values) => label(k.as_str()).is_some_and(|l| values.iter().any(|v| v == l)),
            Requirement::NotIn(k, values) => !label(k.as_str()).is_some_and(|l| values.iter().any(|v| v == l)),
            Requirement::Exists(k) => label(k.as_str()).is_some(),
            Requirement::NotExists(k) => label(k.as_str()).is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Requirement::In(k, values) => write!(f, "{} in ({})", k, values.join(",")),
            Requirement::NotIn(k, values) => write!(f, "{} notin ({})", k, values.join(",")),
            Requirement::Exists(k) => write!(f, "{}", k),
            Requirement::NotExists(k) => write!(f, "!{}", k),
        }
    }
}

/// A parsed label selector. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// The selector matching every object.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parses and AND-s every selector string in `selectors`.
    pub fn parse<I, S>(selectors: I) -> Result<Self, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut requirements = Vec::new();
        for selector in selectors {
            let selector = selector.as_ref();
            for part in split_top_level(selector) {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                requirements.push(parse_requirement(part).map_err(|reason| {
                    LookupError::InvalidSelector {
                        selector: selector.to_string(),
                        reason,
                    }
                })?);
            }
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Tests a label set given as `(key, value)` pairs.
    pub fn matches<'a, I>(&self, labels: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let labels: Vec<(&str, &str)> = labels.into_iter().collect();
        self.requirements.iter().all(|req| {
            req.matches(|key| labels.iter().find(|(k, _)| *k == key).map(|(_, v)| *v))
        })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", req)?;
        }
        Ok(())
    }
}

fn split_top_level(selector: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&selector[start..]);
    parts
}

fn parse_requirement(part: &str) -> Result<Requirement, String> {
    if let Some(caps) = SET_REQUIREMENT.captures(part) {
        let key = caps["key"].to_string();
        let values: Vec<String> = caps["values"]
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            return Err(format!("{:?} needs at least one value", part));
        }
        return Ok(if &caps["op"] == "in" {
            Requirement::In(key, values)
        } else {
            Requirement::NotIn(key, values)
        });
    }

    if let Some(key) = part.strip_prefix('!') {
        return valid_key(key.trim()).map(Requirement::NotExists);
    }

    let (key, value, negated) = if let Some((k, v)) = part.split_once("!=") {
        (k, v, true)
    } else if let Some((k, v)) = part.split_once("==") {
        (k, v, false)
    } else if let Some((k, v)) = part.split_once('=') {
        (k, v, false)
    } else {
        return valid_key(part).map(Requirement::Exists);
    };

    let key = valid_key(key.trim())?;
    let value = value.trim();
    if value.contains(['=', '!', ' ', '(', ')']) {
        return Err(format!("invalid value {:?}", value));
    }
    Ok(if negated {
        Requirement::NotEquals(key, value.to_string())
    } else {
        Requirement::Equals(key, value.to_string())
    })
}

fn valid_key(key: &str) -> Result<String, String> {
    if key.is_empty() || key.contains(|c: char| c.is_whitespace() || "!=(),".contains(c)) {
        Err(format!("invalid label key {:?}", key))
    } else {
        Ok(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [(&str, &str); 3] = [("app", "web"), ("tier", "frontend"), ("env", "prod")];

    fn matches(selector: &str) -> bool {
        LabelSelector::parse([selector])
            .unwrap()
            .matches(LABELS.iter().copied())
    }

    #[test]
    fn test_equality() {
        assert!(matches("app=web"));
        assert!(matches("app==web"));
        assert!(!matches("app=db"));
        assert!(matches("app!=db"));
        assert!(matches("missing!=x"));
        assert!(!matches("app!=web"));
    }

    #[test]
    fn test_existence() {
        assert!(matches("tier"));
        assert!(!matches("missing"));
        assert!(matches("!missing"));
        assert!(!matches("!tier"));
    }

    #[test]
    fn test_sets() {
        assert!(matches("env in (prod, staging)"));
        assert!(!matches("env in (dev)"));
        assert!(matches("env notin (dev,staging)"));
        assert!(matches("missing notin (a)"));
        assert!(!matches("missing in (a)"));
    }

    #[test]
    fn test_commas_and_multiple_selectors_are_anded() {
        assert!(matches("app=web,env in (prod,dev),tier"));
        assert!(!matches("app=web,env=dev"));

        let selector = LabelSelector::parse(["app=web", "env=dev"]).unwrap();
        assert!(!selector.matches(LABELS.iter().copied()));
    }

    #[test]
    fn test_empty_matches_everything() {
        let selector = LabelSelector::parse([""]).unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(std::iter::empty()));
        assert_eq!(LabelSelector::everything(), selector);
    }

    #[test]
    fn test_invalid() {
        for bad in ["=web", "app=we b", "a b", "env in ()", "!"] {
            let err = LabelSelector::parse([bad]).unwrap_err();
            assert!(
                matches!(err, LookupError::InvalidSelector { .. }),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_normalizes() {
        let selector = LabelSelector::parse(["app==web, env in (a, b)", "!x"]).unwrap();
        assert_eq!(selector.to_string(), "app=web,env in (a,b),!x");
    }
}
