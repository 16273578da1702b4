//! Value encoding strategies.
//!
//! Each tier encodes values with its own [`Serializer`], selected from the
//! tier's [`SerializationFormat`] unless one is supplied explicitly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Raw format only stores strings, got {0}")]
    UnsupportedValue(&'static str),

    #[error("Raw payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Value could not be converted: {0}")]
    Conversion(String),
}

/// Encoding format of a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// serde_json bytes.
    #[default]
    Json,
    /// UTF-8 string bytes; only string values are accepted.
    Raw,
}

impl SerializationFormat {
    pub fn serializer(self) -> Arc<dyn Serializer> {
        match self {
            SerializationFormat::Json => Arc::new(JsonSerializer),
            SerializationFormat::Raw => Arc::new(RawSerializer),
        }
    }
}

pub trait Serializer: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializationError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RawSerializer;

impl Serializer for RawSerializer {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Null => Err(SerializationError::UnsupportedValue("null")),
            Value::Bool(_) => Err(SerializationError::UnsupportedValue("bool")),
            Value::Number(_) => Err(SerializationError::UnsupportedValue("number")),
            Value::Array(_) => Err(SerializationError::UnsupportedValue("array")),
            Value::Object(_) => Err(SerializationError::UnsupportedValue("object")),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializationError> {
        Ok(Value::String(String::from_utf8(bytes.to_vec())?))
    }
}
