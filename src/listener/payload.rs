use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::utils::{MyceliaError, Result};

/// A received payload, decoded as far as it would go.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Raw(Vec<u8>),
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Json(value) => write!(f, "{value}"),
            Payload::Text(text) => write!(f, "{text}"),
            Payload::Raw(bytes) => write!(f, "<{} raw bytes>", bytes.len()),
        }
    }
}

pub fn parse_json(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| MyceliaError::MalformedPayload(e.to_string()))
}

/// Decodes JSON, falling back to UTF-8 text and then to raw bytes.
pub fn decode_payload(bytes: &[u8]) -> Payload {
    match parse_json(bytes) {
        Ok(value) => Payload::Json(value),
        Err(e) => {
            tracing::debug!(error = %e, "Payload is not JSON, falling back to text");
            match std::str::from_utf8(bytes) {
                Ok(text) => Payload::Text(text.to_string()),
                Err(_) => Payload::Raw(bytes.to_vec()),
            }
        }
    }
}

pub fn json_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| MyceliaError::MalformedPayload(e.to_string()))
}
