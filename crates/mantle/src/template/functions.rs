//! Built-in template functions.
//!
//! Every function is a closure over the call's [`CallScope`], so lookups,
//! sensitivity tracking and decryption all go through state that lives for
//! one resolution call only.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mantle_crypto::Cipher;
use minijinja::value::ValueKind;
use minijinja::{ErrorKind, Value};
use serde_json::{json, Map};

use super::registry::TemplateFunction;
use crate::error::{ExecutionError, ExecutionErrorKind, FunctionFailure, TemplateError};
use crate::lookup::{LabelSelector, Lookup};
use crate::store::{object_labels, CLUSTER_CLAIM_API_VERSION, NODE_ROLE_LABEL_PREFIX};

/// State shared by the built-ins of one resolution call.
pub(crate) struct CallScope {
    pub(crate) lookup: Lookup,
    pub(crate) cipher: Option<Cipher>,
    pub(crate) encryption_enabled: bool,
    pub(crate) decryption_enabled: bool,
    /// Payloads decrypted before execution, keyed by ciphertext.
    pub(crate) decrypted: HashMap<String, String>,
}

impl CallScope {
    fn mark_sensitive(&self) {
        self.lookup.session().mark_sensitive();
    }

    fn encrypting_cipher(&self) -> Option<&Cipher> {
        self.cipher.as_ref().filter(|_| self.encryption_enabled)
    }
}

/// Wraps a typed failure so it survives the trip through the engine.
pub(crate) fn fail(function: &str, cause: impl Into<TemplateError>) -> minijinja::Error {
    let cause = cause.into();
    minijinja::Error::new(ErrorKind::InvalidOperation, cause.to_string()).with_source(
        FunctionFailure {
            function: function.to_string(),
            cause,
        },
    )
}

pub(crate) fn invalid_argument(function: &str, detail: impl Into<String>) -> minijinja::Error {
    fail(
        function,
        ExecutionError::new(ExecutionErrorKind::FunctionFailed, detail).with_function(function),
    )
}

/// Longest string a repetition or padding argument may produce.
pub(crate) const MAX_GENERATED_LEN: usize = 1 << 20;

/// Converts a repetition count to `usize`. Negative counts read as zero;
/// counts that would produce more than [`MAX_GENERATED_LEN`] bytes fail.
pub(crate) fn repeat_count(function: &str, unit_len: usize, count: i64) -> Result<usize, minijinja::Error> {
    let count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
    match unit_len.checked_mul(count) {
        Some(len) if len <= MAX_GENERATED_LEN => Ok(count),
        _ => Err(invalid_argument(
            function,
            format!("output of {} repetitions exceeds {} bytes", count, MAX_GENERATED_LEN),
        )),
    }
}

/// Reads a string argument. Undefined and none read as the empty string.
pub(crate) fn str_arg<'a>(
    function: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a str, minijinja::Error> {
    match args.get(index) {
        None => Err(minijinja::Error::new(
            ErrorKind::MissingArgument,
            format!("{} expects at least {} arguments", function, index + 1),
        )),
        Some(v) if v.is_undefined() || v.is_none() => Ok(""),
        Some(v) => v.as_str().ok_or_else(|| {
            invalid_argument(
                function,
                format!("argument {} must be a string, got {}", index + 1, v.kind()),
            )
        }),
    }
}

fn optional_str_arg<'a>(
    function: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a str, minijinja::Error> {
    if index < args.len() {
        str_arg(function, args, index)
    } else {
        Ok("")
    }
}

/// Renders a value as text the way it prints in a template.
pub(crate) fn text(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None if value.is_undefined() || value.is_none() => String::new(),
        None => value.to_string(),
    }
}

fn data_field<'v>(object: &'v serde_json::Value, key: &str) -> &'v str {
    object
        .get("data")
        .and_then(|data| data.get(key))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
}

fn data_map(object: &serde_json::Value) -> Map<String, serde_json::Value> {
    object
        .get("data")
        .and_then(serde_json::Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Pads every line after the first by `spaces` and trims the result.
pub(crate) fn indent_text(value: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    let padded = format!("\n{}{}", pad, value.replace('\n', &format!("\n{}", pad)));
    padded.trim().to_string()
}

/// Integer conversion used by `toInt`.
///
/// Strings may carry a zero decimal part (`"6.0"`) and a `0x`, `0o` or `0b`
/// prefix. Floats truncate, booleans map to 0 and 1, anything unparsable is 0.
pub(crate) fn to_int(value: &Value) -> i64 {
    match value.kind() {
        ValueKind::Bool => i64::from(value.is_true()),
        ValueKind::Number => {
            if let Some(n) = value.as_i64() {
                n
            } else {
                f64::try_from(value.clone()).map(|f| f as i64).unwrap_or(0)
            }
        }
        ValueKind::String => parse_int(value.as_str().unwrap_or_default()).unwrap_or(0),
        _ => 0,
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let s = trim_zero_decimal(s);
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let lower = digits.to_ascii_lowercase();
    let magnitude = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        if digits.starts_with(['+', '-']) {
            return None;
        }
        digits.parse::<i64>().ok()?
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn trim_zero_decimal(s: &str) -> &str {
    match s.split_once('.') {
        Some((whole, fraction))
            if !whole.is_empty() && !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') =>
        {
            whole
        }
        _ => s,
    }
}

/// Boolean conversion used by `toBool`.
pub(crate) fn to_bool(value: &Value) -> bool {
    match value.kind() {
        ValueKind::Bool => value.is_true(),
        ValueKind::Number => value.is_true(),
        ValueKind::String => matches!(
            value.as_str().unwrap_or_default(),
            "1" | "t" | "T" | "TRUE" | "true" | "True"
        ),
        _ => false,
    }
}

fn roles_of(node: &serde_json::Value) -> BTreeSet<&str> {
    object_labels(node)
        .filter_map(|(key, _)| key.strip_prefix(NODE_ROLE_LABEL_PREFIX))
        .filter(|role| !role.is_empty())
        .collect()
}

fn nodes_with_exact_roles(
    scope: &CallScope,
    function: &str,
    args: &[Value],
) -> Result<Vec<serde_json::Value>, minijinja::Error> {
    let wanted = (0..args.len())
        .map(|i| str_arg(function, args, i))
        .collect::<Result<BTreeSet<&str>, _>>()?;

    let selector =
        LabelSelector::parse(wanted.iter().map(|role| format!("{}{}", NODE_ROLE_LABEL_PREFIX, role)))
            .map_err(|e| fail(function, e))?;
    let nodes = scope
        .lookup
        .fetch_list(function, "v1", "Node", "", &selector)
        .map_err(|e| fail(function, e))?;

    Ok(nodes
        .into_iter()
        .filter(|node| roles_of(node) == wanted)
        .collect())
}

fn json_text(function: &str, map: &Map<String, serde_json::Value>) -> Result<Value, minijinja::Error> {
    serde_json::to_string(map)
        .map(Value::from)
        .map_err(|e| invalid_argument(function, e.to_string()))
}

/// Builds the built-in layer of the registry for one call.
pub(crate) fn builtins(scope: &Arc<CallScope>) -> Vec<(&'static str, TemplateFunction)> {
    let mut functions: Vec<(&'static str, TemplateFunction)> = Vec::new();

    let s = scope.clone();
    functions.push((
        "lookup",
        TemplateFunction::new(move |args| {
            let api_version = str_arg("lookup", args, 0)?;
            let kind = str_arg("lookup", args, 1)?;
            let namespace = str_arg("lookup", args, 2)?;
            let name = optional_str_arg("lookup", args, 3)?;
            let selectors = (4..args.len())
                .map(|i| str_arg("lookup", args, i).map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?;
            let object = s
                .lookup
                .lookup("lookup", api_version, kind, namespace, name, &selectors)
                .map_err(|e| fail("lookup", e))?;
            Ok(Value::from_serialize(&object))
        }),
    ));

    let s = scope.clone();
    functions.push((
        "fromSecret",
        TemplateFunction::new(move |args| {
            let namespace = str_arg("fromSecret", args, 0)?;
            let name = str_arg("fromSecret", args, 1)?;
            let key = str_arg("fromSecret", args, 2)?;
            s.mark_sensitive();
            let Some(secret) = s
                .lookup
                .fetch("fromSecret", "v1", "Secret", namespace, name)
                .map_err(|e| fail("fromSecret", e))?
            else {
                return Ok(Value::from(""));
            };
            let value = data_field(&secret, key);
            match s.encrypting_cipher() {
                Some(cipher) => cipher
                    .protect(value)
                    .map(Value::from)
                    .map_err(|e| fail("fromSecret", e)),
                None => Ok(Value::from(value)),
            }
        }),
    ));

    let s = scope.clone();
    functions.push((
        "fromConfigMap",
        TemplateFunction::new(move |args| {
            let namespace = str_arg("fromConfigMap", args, 0)?;
            let name = str_arg("fromConfigMap", args, 1)?;
            let key = str_arg("fromConfigMap", args, 2)?;
            let config_map = s
                .lookup
                .fetch("fromConfigMap", "v1", "ConfigMap", namespace, name)
                .map_err(|e| fail("fromConfigMap", e))?;
            Ok(Value::from(
                config_map.as_ref().map(|cm| data_field(cm, key)).unwrap_or(""),
            ))
        }),
    ));

    let s = scope.clone();
    functions.push((
        "fromClusterClaim",
        TemplateFunction::new(move |args| {
            let name = str_arg("fromClusterClaim", args, 0)?;
            let claim = s
                .lookup
                .fetch("fromClusterClaim", CLUSTER_CLAIM_API_VERSION, "ClusterClaim", "", name)
                .map_err(|e| fail("fromClusterClaim", e))?;
            let value = claim
                .as_ref()
                .and_then(|c| c.pointer("/spec/value"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("");
            Ok(Value::from(value))
        }),
    ));

    let s = scope.clone();
    functions.push((
        "copySecretData",
        TemplateFunction::new(move |args| {
            let namespace = str_arg("copySecretData", args, 0)?;
            let name = str_arg("copySecretData", args, 1)?;
            s.mark_sensitive();
            let secret = s
                .lookup
                .fetch("copySecretData", "v1", "Secret", namespace, name)
                .map_err(|e| fail("copySecretData", e))?;
            let mut data = secret.as_ref().map(data_map).unwrap_or_default();
            if let Some(cipher) = s.encrypting_cipher() {
                for value in data.values_mut() {
                    let plain = value.as_str().unwrap_or_default();
                    let protected = cipher.protect(plain).map_err(|e| fail("copySecretData", e))?;
                    *value = serde_json::Value::String(protected);
                }
            }
            json_text("copySecretData", &data)
        }),
    ));

    let s = scope.clone();
    functions.push((
        "copyConfigMapData",
        TemplateFunction::new(move |args| {
            let namespace = str_arg("copyConfigMapData", args, 0)?;
            let name = str_arg("copyConfigMapData", args, 1)?;
            let config_map = s
                .lookup
                .fetch("copyConfigMapData", "v1", "ConfigMap", namespace, name)
                .map_err(|e| fail("copyConfigMapData", e))?;
            json_text(
                "copyConfigMapData",
                &config_map.as_ref().map(data_map).unwrap_or_default(),
            )
        }),
    ));

    let s = scope.clone();
    functions.push((
        "getNodesWithExactRoles",
        TemplateFunction::new(move |args| {
            let items = nodes_with_exact_roles(&s, "getNodesWithExactRoles", args)?;
            Ok(Value::from_serialize(json!({
                "apiVersion": "v1",
                "kind": "NodeList",
                "metadata": {},
                "items": items,
            })))
        }),
    ));

    let s = scope.clone();
    functions.push((
        "hasNodesWithExactRoles",
        TemplateFunction::new(move |args| {
            let items = nodes_with_exact_roles(&s, "hasNodesWithExactRoles", args)?;
            Ok(Value::from(!items.is_empty()))
        }),
    ));

    functions.push((
        "base64enc",
        TemplateFunction::new(|args| {
            let value = args.first().map(text).unwrap_or_default();
            Ok(Value::from(STANDARD.encode(value)))
        }),
    ));

    functions.push((
        "base64dec",
        TemplateFunction::new(|args| {
            let value = str_arg("base64dec", args, 0)?;
            let bytes = STANDARD
                .decode(value)
                .map_err(|e| invalid_argument("base64dec", format!("invalid base64: {}", e)))?;
            Ok(Value::from(String::from_utf8_lossy(&bytes).into_owned()))
        }),
    ));

    functions.push((
        "toInt",
        TemplateFunction::new(|args| Ok(Value::from(args.first().map(to_int).unwrap_or(0)))),
    ));

    functions.push((
        "atoi",
        TemplateFunction::new(|args| {
            let value = args.first().map(text).unwrap_or_default();
            Ok(Value::from(value.parse::<i64>().unwrap_or(0)))
        }),
    ));

    functions.push((
        "toBool",
        TemplateFunction::new(|args| Ok(Value::from(args.first().is_some_and(to_bool)))),
    ));

    functions.push((
        "toLiteral",
        TemplateFunction::new(|args| Ok(args.first().cloned().unwrap_or(Value::from("")))),
    ));

    functions.push((
        "indent",
        TemplateFunction::new(|args| {
            let value = args.first().map(text).unwrap_or_default();
            let spaces = repeat_count("indent", 1, args.get(1).map(to_int).unwrap_or(0))?;
            Ok(Value::from(indent_text(&value, spaces)))
        }),
    ));

    functions.push((
        "autoindent",
        TemplateFunction::failing(
            "autoindent",
            ExecutionError::new(
                ExecutionErrorKind::FunctionFailed,
                "autoindent must be the last filter of an expression that starts on its own line",
            )
            .with_function("autoindent"),
        ),
    ));

    let protect = if let Some(cipher) = scope.encrypting_cipher().cloned() {
        let s = scope.clone();
        TemplateFunction::new(move |args| {
            let value = args.first().map(text).unwrap_or_default();
            s.mark_sensitive();
            cipher
                .protect(&value)
                .map(Value::from)
                .map_err(|e| fail("protect", e))
        })
    } else {
        TemplateFunction::failing(
            "protect",
            ExecutionError::not_enabled(
                "protect",
                "the protect template function is not enabled in this mode",
            ),
        )
    };
    functions.push(("protect", protect));

    if scope.decryption_enabled {
        if let Some(cipher) = scope.cipher.clone() {
            let s = scope.clone();
            functions.push((
                "decrypt",
                TemplateFunction::new(move |args| {
                    let payload = str_arg("decrypt", args, 0)?;
                    s.mark_sensitive();
                    if let Some(plain) = s.decrypted.get(payload) {
                        return Ok(Value::from(plain.as_str()));
                    }
                    cipher
                        .decrypt(payload)
                        .map(Value::from)
                        .map_err(|e| fail("decrypt", e))
                }),
            ));
        }
    }

    functions
}
