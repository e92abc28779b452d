// codec.rs — The Codec capability and its closed set of implementations.
//
// Payloads travel through ZRC as `serde_json::Value`, a dynamic "any" value.
// A codec only decides how that value becomes bytes on the wire:
//   json     — UTF-8 JSON text (default)
//   msgpack  — MessagePack, compact binary
//   raw      — byte blobs and strings passed through untouched
//
// Codecs are picked by name once, when an endpoint is built, instead of
// branching on a name string for every message.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// A paired encode/decode strategy for one wire format.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Which member of the closed set this is.
    fn kind(&self) -> CodecKind;

    /// Encode a payload value to bytes.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes back into a payload value.
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Names of the supported codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Json,
    #[serde(alias = "binary", alias = "messagepack")]
    Msgpack,
    Raw,
}

impl CodecKind {
    pub fn name(self) -> &'static str {
        match self {
            CodecKind::Json => "json",
            CodecKind::Msgpack => "msgpack",
            CodecKind::Raw => "raw",
        }
    }

    /// Build the codec implementation for this kind.
    pub fn codec(self) -> Arc<dyn Codec> {
        match self {
            CodecKind::Json => Arc::new(JsonCodec),
            CodecKind::Msgpack => Arc::new(MessagePackCodec),
            CodecKind::Raw => Arc::new(RawCodec),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(CodecKind::Json),
            "msgpack" | "messagepack" | "binary" => Ok(CodecKind::Msgpack),
            "raw" | "bytes" => Ok(CodecKind::Raw),
            _ => Err(CodecError::UnknownCodec(s.to_string())),
        }
    }
}

/// Resolve a codec by name (`json`, `msgpack`/`binary`, `raw`).
pub fn codec_by_name(name: &str) -> Result<Arc<dyn Codec>, CodecError> {
    Ok(name.parse::<CodecKind>()?.codec())
}

/// JSON text. Non-JSON UTF-8 input decodes as a plain string.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Json
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            codec: "json",
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Ok(value),
            Err(json_err) => match std::str::from_utf8(bytes) {
                // Plain text publishers are tolerated: deliver the text itself.
                Ok(text) => Ok(Value::String(text.to_string())),
                Err(_) => Err(CodecError::Decode {
                    codec: "json",
                    reason: json_err.to_string(),
                }),
            },
        }
    }
}

/// MessagePack binary encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

impl Codec for MessagePackCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Msgpack
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec(value).map_err(|e| CodecError::Encode {
            codec: "msgpack",
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: "msgpack",
            reason: e.to_string(),
        })
    }
}

/// Raw bytes. Encodes strings and byte arrays as-is; decodes to a byte array.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Raw
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match value {
            Value::String(text) => Ok(text.as_bytes().to_vec()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| CodecError::Encode {
                            codec: "raw",
                            reason: format!("array element {item} is not a byte"),
                        })
                })
                .collect(),
            other => Err(CodecError::Encode {
                codec: "raw",
                reason: format!("raw payloads must be bytes or a string, got {}", kind_of(other)),
            }),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
