// error.rs — Error types for payload encoding and decoding.

use thiserror::Error;

/// Errors that can occur while encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The codec could not turn the value into bytes.
    #[error("{codec} encode failed: {reason}")]
    Encode { codec: &'static str, reason: String },

    /// The bytes are not valid for the codec.
    #[error("{codec} decode failed: {reason}")]
    Decode { codec: &'static str, reason: String },

    /// A typed value could not be converted to or from the dynamic payload form.
    #[error("payload conversion failed: {0}")]
    Conversion(#[from] serde_json::Error),

    /// The codec name is not one of the supported set.
    #[error("unknown codec '{0}' (expected json, msgpack or raw)")]
    UnknownCodec(String),
}
