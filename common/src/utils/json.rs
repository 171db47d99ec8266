//! JSON encode/decode helpers.
//!
//! Decode failures map to `AppError::InvalidArgument` so malformed caller
//! payloads never surface as internal errors.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{AppError, AppResult};

/// JSON codec for caller-supplied payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Decodes a JSON object. An empty (or all-whitespace) string is `{}`.
    pub fn decode_object(what: &str, s: &str) -> AppResult<Map<String, Value>> {
        if s.trim().is_empty() {
            return Ok(Map::new());
        }
        match Self::decode_value(what, s)? {
            Value::Object(map) => Ok(map),
            other => Err(AppError::InvalidArgument(format!(
                "{} must be a JSON object, got {}",
                what,
                type_name(&other)
            ))),
        }
    }

    /// Decodes a JSON array.
    pub fn decode_array(what: &str, s: &str) -> AppResult<Vec<Value>> {
        match Self::decode_value(what, s)? {
            Value::Array(items) => Ok(items),
            other => Err(AppError::InvalidArgument(format!(
                "{} must be a JSON array, got {}",
                what,
                type_name(&other)
            ))),
        }
    }

    /// Decodes any JSON value.
    pub fn decode_value(what: &str, s: &str) -> AppResult<Value> {
        serde_json::from_str(s)
            .map_err(|e| AppError::InvalidArgument(format!("malformed {}: {}", what, e)))
    }

    /// Encodes a value for transport.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> AppResult<String> {
        serde_json::to_string(value)
            .map_err(|e| AppError::InvalidArgument(format!("cannot encode result: {}", e)))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
