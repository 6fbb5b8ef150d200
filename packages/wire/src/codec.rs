//! Conversion between runtime objects and the canonical wire value.
//!
//! The canonical wire value is `serde_json::Value`. Mapping:
//!
//! | runtime            | wire              |
//! |--------------------|-------------------|
//! | `None`             | `null`            |
//! | `Bool`             | boolean           |
//! | `Int`              | integer number    |
//! | `Float` (finite)   | float number      |
//! | `Str`              | string            |
//! | `List`             | array             |
//! | `Dict`             | object            |
//!
//! Bytes, functions and handles have no wire form; buffers travel
//! separately through [`BufferCodec`](crate::BufferCodec).

use embedkern_runtime::{Dict, List, Object, RuntimeGuard};
use serde_json::Number;

use crate::error::{Result, WireError};
use crate::message::{JsonMap, JsonValue};

/// Default container nesting limit for encoding.
///
/// Kept below the JSON parser's own limit so anything encoded can be read
/// back.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Structured-value codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireCodec {
    max_depth: usize,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Encode a runtime object as a wire value.
    ///
    /// Fails on reference cycles, non-finite floats, values with no wire
    /// form, and nesting deeper than [`max_depth`](Self::max_depth).
    pub fn encode(&self, _guard: &RuntimeGuard<'_>, value: &Object) -> Result<JsonValue> {
        let mut active = Vec::new();
        self.encode_inner(value, &mut active)
    }

    /// Encode a dict (or `None`, read as an empty dict) as a wire object.
    ///
    /// `what` names the argument in the error raised for anything else.
    pub fn encode_map(
        &self,
        guard: &RuntimeGuard<'_>,
        value: &Object,
        what: &str,
    ) -> Result<JsonMap> {
        match value {
            Object::None => Ok(JsonMap::new()),
            Object::Dict(_) => match self.encode(guard, value)? {
                JsonValue::Object(map) => Ok(map),
                _ => Err(WireError::Serialization(format!("{what} must be a dict"))),
            },
            other => Err(WireError::Serialization(format!(
                "{what} must be a dict, not {}",
                other.type_name()
            ))),
        }
    }

    fn encode_inner(&self, value: &Object, active: &mut Vec<usize>) -> Result<JsonValue> {
        match value {
            Object::None => Ok(JsonValue::Null),
            Object::Bool(b) => Ok(JsonValue::Bool(*b)),
            Object::Int(i) => Ok(JsonValue::Number((*i).into())),
            Object::Float(f) => Number::from_f64(*f).map(JsonValue::Number).ok_or_else(|| {
                WireError::Serialization(
                    "Out of range float values are not JSON compliant".to_string(),
                )
            }),
            Object::Str(s) => Ok(JsonValue::String(s.clone())),
            Object::List(list) => {
                self.enter(list.id(), active)?;
                let items = list
                    .snapshot()
                    .iter()
                    .map(|item| self.encode_inner(item, active))
                    .collect::<Result<Vec<_>>>();
                active.pop();
                Ok(JsonValue::Array(items?))
            }
            Object::Dict(dict) => {
                self.enter(dict.id(), active)?;
                let entries = dict
                    .snapshot()
                    .into_iter()
                    .map(|(k, v)| -> Result<(String, JsonValue)> {
                        Ok((k, self.encode_inner(&v, active)?))
                    })
                    .collect::<Result<JsonMap>>();
                active.pop();
                Ok(JsonValue::Object(entries?))
            }
            other => Err(WireError::Serialization(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            ))),
        }
    }

    fn enter(&self, id: usize, active: &mut Vec<usize>) -> Result<()> {
        if active.contains(&id) {
            return Err(WireError::Serialization(
                "Circular reference detected".to_string(),
            ));
        }
        if active.len() >= self.max_depth {
            return Err(WireError::Serialization(format!(
                "maximum nesting depth of {} exceeded",
                self.max_depth
            )));
        }
        active.push(id);
        Ok(())
    }

    /// Build a runtime object from a wire value.
    pub fn decode(&self, guard: &RuntimeGuard<'_>, value: &JsonValue) -> Object {
        match value {
            JsonValue::Null => Object::None,
            JsonValue::Bool(b) => Object::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Object::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Object::Float(f)
                } else {
                    Object::Str(n.to_string())
                }
            }
            JsonValue::String(s) => Object::Str(s.clone()),
            JsonValue::Array(items) => Object::List(List::from_vec(
                items.iter().map(|item| self.decode(guard, item)).collect(),
            )),
            JsonValue::Object(map) => Object::Dict(self.decode_map(guard, map)),
        }
    }

    pub fn decode_map(&self, guard: &RuntimeGuard<'_>, map: &JsonMap) -> Dict {
        map.iter()
            .map(|(k, v)| (k.clone(), self.decode(guard, v)))
            .collect()
    }

    /// Render a wire value as compact JSON text.
    pub fn to_text(&self, value: &JsonValue) -> Result<String> {
        serde_json::to_string(value).map_err(|e| WireError::Serialization(e.to_string()))
    }

    /// Parse JSON text into a wire value.
    pub fn from_text(&self, text: &str) -> Result<JsonValue> {
        serde_json::from_str(text).map_err(|e| WireError::MalformedWireData(e.to_string()))
    }

    pub fn encode_text(&self, guard: &RuntimeGuard<'_>, value: &Object) -> Result<String> {
        self.to_text(&self.encode(guard, value)?)
    }

    pub fn decode_text(&self, guard: &RuntimeGuard<'_>, text: &str) -> Result<Object> {
        Ok(self.decode(guard, &self.from_text(text)?))
    }
}
