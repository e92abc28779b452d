//! # zrc-codec
//!
//! Wire codecs for ZRC payloads.
//!
//! Every payload is a dynamic [`serde_json::Value`]; a [`Codec`] turns it into
//! bytes and back. Typed values go through [`to_bytes`] / [`from_bytes`],
//! which convert via `Value` so any `Serialize`/`Deserialize` type works with
//! every codec that can represent it.
//!
//! ```rust
//! use zrc_codec::{from_bytes, to_bytes, CodecKind};
//!
//! let codec = CodecKind::Msgpack.codec();
//! let bytes = to_bytes(codec.as_ref(), &vec![1u32, 2, 3]).unwrap();
//! let back: Vec<u32> = from_bytes(codec.as_ref(), &bytes).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

pub mod codec;
pub mod error;

pub use codec::{codec_by_name, Codec, CodecKind, JsonCodec, MessagePackCodec, RawCodec};
pub use error::CodecError;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode any serializable value with `codec`.
pub fn to_bytes<T: Serialize + ?Sized>(codec: &dyn Codec, value: &T) -> Result<Vec<u8>, CodecError> {
    let value = serde_json::to_value(value)?;
    codec.encode(&value)
}

/// Decode bytes produced by `codec` into a typed value.
pub fn from_bytes<T: DeserializeOwned>(codec: &dyn Codec, bytes: &[u8]) -> Result<T, CodecError> {
    let value = codec.decode(bytes)?;
    Ok(serde_json::from_value(value)?)
}
