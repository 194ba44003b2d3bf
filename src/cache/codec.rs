//! Structural codec between typed values and byte payloads.
//!
//! Values are first turned into a `serde_json::Value` tree by serde, so only
//! the fields serde serializes take part in the round trip. A field marked
//! `#[serde(skip)]` is never stored and decodes as its `Default`.
//! The [`Codec`] then decides the byte layout of that tree.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, Result};

/// Byte layout for structural values.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode_value(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode_value(&self, bytes: &[u8]) -> Result<Value>;
}

/// JSON text layout. Human-readable payloads that are easy to inspect.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode_value(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::Serialize(e.to_string()))
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialize(e.to_string()))
    }
}

/// Serializes `value` to payload bytes through `codec`.
pub fn encode<T, C>(codec: &C, value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
    C: Codec + ?Sized,
{
    let tree = serde_json::to_value(value).map_err(|e| CacheError::Serialize(e.to_string()))?;
    codec.encode_value(&tree)
}

/// Deserializes payload bytes through `codec`.
pub fn decode<T, C>(codec: &C, bytes: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
    C: Codec + ?Sized,
{
    let tree = codec.decode_value(bytes)?;
    serde_json::from_value(tree).map_err(|e| CacheError::Deserialize(e.to_string()))
}
