//! Conversions between the structured input/output forms.

use serde_json::{Map, Number, Value as Json};
use serde_yaml::Value as Yaml;

use crate::error::ParseError;

/// Re-renders a JSON document as YAML text.
pub(crate) fn json_to_yaml_text(raw: &str) -> Result<String, ParseError> {
    let value: Json = serde_json::from_str(raw).map_err(|e| ParseError::Json(e.to_string()))?;
    serde_yaml::to_string(&value).map_err(|e| ParseError::Json(e.to_string()))
}

/// Parses executed YAML text into a JSON value.
pub(crate) fn yaml_text_to_json(text: &str) -> Result<Json, ParseError> {
    let value: Yaml = serde_yaml::from_str(text).map_err(|e| ParseError::Yaml(e.to_string()))?;
    yaml_to_json(value)
}

/// Converts a YAML value to JSON. Scalar keys are stringified and tags are
/// dropped.
pub(crate) fn yaml_to_json(value: Yaml) -> Result<Json, ParseError> {
    Ok(match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::from(i)
            } else if let Some(u) = n.as_u64() {
                Json::from(u)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                Json::Number(
                    Number::from_f64(f)
                        .ok_or_else(|| ParseError::Yaml(format!("{} cannot be represented in JSON", n)))?,
                )
            }
        }
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(items) => Json::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                map.insert(key_text(key)?, yaml_to_json(value)?);
            }
            Json::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn key_text(key: Yaml) -> Result<String, ParseError> {
    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Tagged(tagged) => key_text(tagged.value),
        Yaml::Sequence(_) | Yaml::Mapping(_) => Err(ParseError::Yaml(
            "mapping keys must be scalars".to_string(),
        )),
    }
}
