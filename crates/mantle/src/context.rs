//! Validation of the caller-supplied template context.
//!
//! Templates may only consume plain data: booleans, integers, finite floats,
//! strings, sequences, and maps or structs whose keys are primitive. The
//! context is walked with a custom [`serde::Serializer`], so any `Serialize`
//! type can be passed and is checked without being converted twice.
//!
//! Rejected anywhere below the top level:
//!
//! - `Option` and unit values (`None`, `()`, JSON `null`)
//! - byte buffers
//! - enum variants of any shape
//! - non-finite floats
//! - maps keyed by sequences or maps
//!
//! At the top level a unit or `None` is accepted and means "no context"; any
//! other top-level value must be a map or struct.

use std::fmt;

use serde::ser::{
    Impossible, Serialize, SerializeMap, SerializeSeq, SerializeStruct, SerializeTuple,
    SerializeTupleStruct, Serializer,
};
use serde_json::{Map, Number, Value};

use crate::error::ValidationError;

/// Validates `context` and returns it as a JSON object.
///
/// ```rust
/// use mantle::context::validate_context;
/// use serde_json::json;
///
/// let ctx = validate_context(&json!({"name": "web", "replicas": 3})).unwrap();
/// assert_eq!(ctx["replicas"], 3);
///
/// assert!(validate_context(&()).unwrap().is_empty());
/// assert!(validate_context(&json!({"missing": null})).is_err());
/// ```
pub fn validate_context<C>(context: &C) -> Result<Map<String, Value>, ValidationError>
where
    C: Serialize + ?Sized,
{
    match context.serialize(ContextSerializer { top_level: true }) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(ValidationError::InvalidContext(format!(
            "a top-level {}",
            kind_name(&other)
        ))),
        Err(ShapeError(kind)) => Err(ValidationError::InvalidContext(kind)),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "seq",
        Value::Object(_) => "map",
    }
}

#[derive(Debug)]
struct ShapeError(String);

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ShapeError {}

impl serde::ser::Error for ShapeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ShapeError(msg.to_string())
    }
}

fn reject<T>(kind: &str) -> Result<T, ShapeError> {
    Err(ShapeError(kind.to_string()))
}

#[derive(Clone, Copy)]
struct ContextSerializer {
    top_level: bool,
}

const NESTED: ContextSerializer = ContextSerializer { top_level: false };

impl Serializer for ContextSerializer {
    type Ok = Value;
    type Error = ShapeError;
    type SerializeSeq = SeqCollector;
    type SerializeTuple = SeqCollector;
    type SerializeTupleStruct = SeqCollector;
    type SerializeTupleVariant = Impossible<Value, ShapeError>;
    type SerializeMap = MapCollector;
    type SerializeStruct = MapCollector;
    type SerializeStructVariant = Impossible<Value, ShapeError>;

    fn serialize_bool(self, v: bool) -> Result<Value, ShapeError> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, ShapeError> {
        Ok(Value::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, ShapeError> {
        Ok(Value::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, ShapeError> {
        Ok(Value::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, ShapeError> {
        Ok(Value::from(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Value, ShapeError> {
        if let Ok(v) = i64::try_from(v) {
            Ok(Value::from(v))
        } else if let Ok(v) = u64::try_from(v) {
            Ok(Value::from(v))
        } else {
            reject("an out of range 128-bit integer")
        }
    }

    fn serialize_u8(self, v: u8) -> Result<Value, ShapeError> {
        Ok(Value::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, ShapeError> {
        Ok(Value::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, ShapeError> {
        Ok(Value::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, ShapeError> {
        Ok(Value::from(v))
    }

    fn serialize_u128(self, v: u128) -> Result<Value, ShapeError> {
        match u64::try_from(v) {
            Ok(v) => Ok(Value::from(v)),
            Err(_) => reject("an out of range 128-bit integer"),
        }
    }

    fn serialize_f32(self, v: f32) -> Result<Value, ShapeError> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<Value, ShapeError> {
        match Number::from_f64(v) {
            Some(n) => Ok(Value::Number(n)),
            None => reject("a non-finite float"),
        }
    }

    fn serialize_char(self, v: char) -> Result<Value, ShapeError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, ShapeError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<Value, ShapeError> {
        reject("bytes")
    }

    fn serialize_none(self) -> Result<Value, ShapeError> {
        if self.top_level {
            Ok(Value::Null)
        } else {
            reject("an option")
        }
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Value, ShapeError> {
        if self.top_level {
            value.serialize(self)
        } else {
            reject("an option")
        }
    }

    fn serialize_unit(self) -> Result<Value, ShapeError> {
        if self.top_level {
            Ok(Value::Null)
        } else {
            reject("null")
        }
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<Value, ShapeError> {
        reject(&format!("the unit struct {}", name))
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Value, ShapeError> {
        reject(&format!("the enum variant {}::{}", name, variant))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Value, ShapeError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        _value: &T,
    ) -> Result<Value, ShapeError> {
        reject(&format!("the enum variant {}::{}", name, variant))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqCollector, ShapeError> {
        Ok(SeqCollector {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqCollector, ShapeError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqCollector, ShapeError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, ShapeError> {
        reject(&format!("the enum variant {}::{}", name, variant))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapCollector, ShapeError> {
        Ok(MapCollector {
            map: Map::new(),
            next_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapCollector, ShapeError> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, ShapeError> {
        reject(&format!("the enum variant {}::{}", name, variant))
    }
}

struct SeqCollector {
    items: Vec<Value>,
}

impl SerializeSeq for SeqCollector {
    type Ok = Value;
    type Error = ShapeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ShapeError> {
        self.items.push(value.serialize(NESTED)?);
        Ok(())
    }

    fn end(self) -> Result<Value, ShapeError> {
        Ok(Value::Array(self.items))
    }
}

impl SerializeTuple for SeqCollector {
    type Ok = Value;
    type Error = ShapeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ShapeError> {
        SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, ShapeError> {
        SerializeSeq::end(self)
    }
}

impl SerializeTupleStruct for SeqCollector {
    type Ok = Value;
    type Error = ShapeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ShapeError> {
        SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, ShapeError> {
        SerializeSeq::end(self)
    }
}

struct MapCollector {
    map: Map<String, Value>,
    next_key: Option<String>,
}

impl SerializeMap for MapCollector {
    type Ok = Value;
    type Error = ShapeError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), ShapeError> {
        let key = match key.serialize(NESTED)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => return reject(&format!("a map key of kind {}", kind_name(&other))),
        };
        self.next_key = Some(key);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ShapeError> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| ShapeError("a map value without a key".to_string()))?;
        self.map.insert(key, value.serialize(NESTED)?);
        Ok(())
    }

    fn end(self) -> Result<Value, ShapeError> {
        Ok(Value::Object(self.map))
    }
}

impl SerializeStruct for MapCollector {
    type Ok = Value;
    type Error = ShapeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), ShapeError> {
        self.map.insert(key.to_string(), value.serialize(NESTED)?);
        Ok(())
    }

    fn end(self) -> Result<Value, ShapeError> {
        Ok(Value::Object(self.map))
    }
}
