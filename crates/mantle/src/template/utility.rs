//! General-purpose string, collection and date helpers.
//!
//! These fill the second registry layer and never shadow a built-in. Like
//! the built-ins they take their subject first, so `{{ name | trimPrefix("v") }}`
//! and `{{ trimPrefix(name, "v") }}` are the same call.

use std::fmt::Write as _;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use heck::{ToKebabCase, ToPascalCase, ToSnakeCase};
use minijinja::value::ValueKind;
use minijinja::Value;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use super::functions::{invalid_argument, repeat_count, str_arg, text, to_int};
use super::registry::TemplateFunction;

static ENV_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap());

fn string_fn<F>(f: F) -> TemplateFunction
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    TemplateFunction::new(move |args| Ok(Value::from(f(&args.first().map(text).unwrap_or_default()))))
}

fn string_pair_fn<F>(f: F) -> TemplateFunction
where
    F: Fn(&str, &str) -> Value + Send + Sync + 'static,
{
    TemplateFunction::new(move |args| {
        let subject = args.first().map(text).unwrap_or_default();
        let other = args.get(1).map(text).unwrap_or_default();
        Ok(f(&subject, &other))
    })
}

fn chars_range(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn substr(s: &str, start: i64, end: i64) -> String {
    let len = s.chars().count() as i64;
    if start < 0 {
        return chars_range(s, 0, end.clamp(0, len) as usize);
    }
    let start = start.min(len);
    if end < 0 || end > len {
        return chars_range(s, start as usize, len as usize);
    }
    chars_range(s, start as usize, end.max(start) as usize)
}

fn trunc(s: &str, n: i64) -> String {
    let len = s.chars().count() as i64;
    if n < 0 {
        let keep = n.unsigned_abs().min(len as u64) as i64;
        chars_range(s, (len - keep) as usize, len as usize)
    } else {
        chars_range(s, 0, n.min(len) as usize)
    }
}

fn parse_time(value: Option<&Value>) -> Result<DateTime<Utc>, String> {
    let Some(value) = value.filter(|v| !v.is_undefined() && !v.is_none()) else {
        return Ok(Utc::now());
    };
    match value.kind() {
        ValueKind::Number => DateTime::from_timestamp(to_int(value), 0)
            .ok_or_else(|| format!("timestamp {} is out of range", value)),
        _ => DateTime::parse_from_rfc3339(&text(value))
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("invalid RFC 3339 time {:?}: {}", text(value), e)),
    }
}

fn expand_env(s: &str) -> String {
    ENV_REFERENCE
        .replace_all(s, |caps: &Captures<'_>| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

/// The utility layer of the registry.
pub(crate) fn utilities() -> Vec<(&'static str, TemplateFunction)> {
    vec![
        (
            "trimPrefix",
            string_pair_fn(|s, prefix| Value::from(s.strip_prefix(prefix).unwrap_or(s))),
        ),
        (
            "trimSuffix",
            string_pair_fn(|s, suffix| Value::from(s.strip_suffix(suffix).unwrap_or(s))),
        ),
        (
            "trimAll",
            string_pair_fn(|s, cutset| Value::from(s.trim_matches(|c: char| cutset.contains(c)))),
        ),
        ("contains", string_pair_fn(|s, needle| Value::from(s.contains(needle)))),
        ("hasPrefix", string_pair_fn(|s, prefix| Value::from(s.starts_with(prefix)))),
        ("hasSuffix", string_pair_fn(|s, suffix| Value::from(s.ends_with(suffix)))),
        (
            "splitList",
            string_pair_fn(|s, sep| {
                if sep.is_empty() {
                    Value::from(s.chars().map(String::from).collect::<Vec<_>>())
                } else {
                    Value::from(s.split(sep).map(str::to_string).collect::<Vec<_>>())
                }
            }),
        ),
        (
            "quote",
            TemplateFunction::new(|args| {
                let quoted: Vec<String> = args
                    .iter()
                    .filter(|a| !a.is_undefined() && !a.is_none())
                    .map(|a| format!("{:?}", text(a)))
                    .collect();
                Ok(Value::from(quoted.join(" ")))
            }),
        ),
        (
            "squote",
            TemplateFunction::new(|args| {
                let quoted: Vec<String> = args
                    .iter()
                    .filter(|a| !a.is_undefined() && !a.is_none())
                    .map(|a| format!("'{}'", text(a)))
                    .collect();
                Ok(Value::from(quoted.join(" ")))
            }),
        ),
        (
            "cat",
            TemplateFunction::new(|args| {
                let parts: Vec<String> = args
                    .iter()
                    .filter(|a| !a.is_undefined() && !a.is_none())
                    .map(text)
                    .collect();
                Ok(Value::from(parts.join(" ")))
            }),
        ),
        (
            "repeat",
            TemplateFunction::new(|args| {
                let s = args.first().map(text).unwrap_or_default();
                let count = repeat_count("repeat", s.len(), args.get(1).map(to_int).unwrap_or(0))?;
                Ok(Value::from(s.repeat(count)))
            }),
        ),
        (
            "substr",
            TemplateFunction::new(|args| {
                let s = args.first().map(text).unwrap_or_default();
                let start = args.get(1).map(to_int).unwrap_or(0);
                let end = args.get(2).map(to_int).unwrap_or(-1);
                Ok(Value::from(substr(&s, start, end)))
            }),
        ),
        (
            "trunc",
            TemplateFunction::new(|args| {
                let s = args.first().map(text).unwrap_or_default();
                let n = args.get(1).map(to_int).unwrap_or(0);
                Ok(Value::from(trunc(&s, n)))
            }),
        ),
        (
            "nospace",
            string_fn(|s| s.chars().filter(|c| !c.is_whitespace()).collect()),
        ),
        ("snakecase", string_fn(|s| s.to_snake_case())),
        ("camelcase", string_fn(|s| s.to_pascal_case())),
        ("kebabcase", string_fn(|s| s.to_kebab_case())),
        (
            "empty",
            TemplateFunction::new(|args| Ok(Value::from(!args.first().is_some_and(Value::is_true)))),
        ),
        (
            "coalesce",
            TemplateFunction::new(|args| {
                Ok(args
                    .iter()
                    .find(|a| a.is_true())
                    .cloned()
                    .unwrap_or(Value::from(())))
            }),
        ),
        (
            "ternary",
            TemplateFunction::new(|args| {
                let condition = args.first().is_some_and(Value::is_true);
                let pick = if condition { args.get(1) } else { args.get(2) };
                Ok(pick.cloned().unwrap_or(Value::from(())))
            }),
        ),
        (
            "hasKey",
            TemplateFunction::new(|args| {
                let key = str_arg("hasKey", args, 1)?;
                let found = args
                    .first()
                    .filter(|m| m.kind() == ValueKind::Map)
                    .and_then(|m| m.get_attr(key).ok())
                    .is_some_and(|v| !v.is_undefined());
                Ok(Value::from(found))
            }),
        ),
        (
            "uniq",
            TemplateFunction::new(|args| {
                let mut seen: Vec<Value> = Vec::new();
                if let Some(list) = args.first() {
                    let items = list
                        .try_iter()
                        .map_err(|e| invalid_argument("uniq", e.to_string()))?;
                    for item in items {
                        if !seen.contains(&item) {
                            seen.push(item);
                        }
                    }
                }
                Ok(Value::from(seen))
            }),
        ),
        ("toString", string_fn(str::to_string)),
        (
            "toJson",
            TemplateFunction::new(|args| {
                let value = args.first().cloned().unwrap_or(Value::from(()));
                serde_json::to_string(&value)
                    .map(Value::from)
                    .map_err(|e| invalid_argument("toJson", e.to_string()))
            }),
        ),
        (
            "fromJson",
            TemplateFunction::new(|args| {
                let raw = args.first().map(text).unwrap_or_default();
                let parsed: serde_json::Value = serde_json::from_str(&raw)
                    .map_err(|e| invalid_argument("fromJson", format!("invalid JSON: {}", e)))?;
                Ok(Value::from_serialize(&parsed))
            }),
        ),
        ("b64enc", string_fn(|s| STANDARD.encode(s))),
        (
            "b64dec",
            TemplateFunction::new(|args| {
                let raw = args.first().map(text).unwrap_or_default();
                let bytes = STANDARD
                    .decode(raw)
                    .map_err(|e| invalid_argument("b64dec", format!("invalid base64: {}", e)))?;
                Ok(Value::from(String::from_utf8_lossy(&bytes).into_owned()))
            }),
        ),
        ("sha256sum", string_fn(|s| hex::encode(Sha256::digest(s.as_bytes())))),
        (
            "now",
            TemplateFunction::new(|_| Ok(Value::from(Utc::now().to_rfc3339()))),
        ),
        (
            "date",
            TemplateFunction::new(|args| {
                let time = parse_time(args.first()).map_err(|e| invalid_argument("date", e))?;
                let format = args
                    .get(1)
                    .map(text)
                    .unwrap_or_else(|| "%Y-%m-%d".to_string());
                let mut out = String::new();
                write!(out, "{}", time.format(&format)).map_err(|_| {
                    invalid_argument("date", format!("invalid date format {:?}", format))
                })?;
                Ok(Value::from(out))
            }),
        ),
        (
            "indent",
            TemplateFunction::new(|args| {
                let s = args.first().map(text).unwrap_or_default();
                let pad = " ".repeat(repeat_count("indent", 1, args.get(1).map(to_int).unwrap_or(0))?);
                Ok(Value::from(format!("{}{}", pad, s.replace('\n', &format!("\n{}", pad)))))
            }),
        ),
        (
            "env",
            string_fn(|name| std::env::var(name).unwrap_or_default()),
        ),
        ("expandenv", string_fn(expand_env)),
    ]
}
