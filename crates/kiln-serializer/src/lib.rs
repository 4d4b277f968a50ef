//! # Kiln Serializer
//!
//! An EJSON-like value tree that round-trips through plain JSON while
//! preserving three shapes [`serde_json::Value`] cannot represent natively:
//! [`EJson::Date`], [`EJson::BigInt`], and [`EJson::Bytes`]. On the wire each
//! becomes a tagged object `{ "__type": "...", "value":... }`; decoding
//! recognizes the tag and restores the native shape.
//!
//! [`EJson::Array`] and [`EJson::Object`] hold their children behind
//! `Arc<Mutex<_>>` so that callers can build genuinely shared (and, for
//! logging scenarios, genuinely circular) trees — the same object pushed
//! into two places, or into itself. [`EJson::to_value`] walks the tree
//! tracking the ancestor pointers on its current path and substitutes the
//! literal string `"[Circular]"` the moment a node reappears, matching the
//! boundary behavior in.

mod sentinel;
mod value;

pub use sentinel::{FileSentinel, FileSentinelMeta};
pub use value::EJson;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while stringifying or parsing.
#[derive(Debug, Error)]
pub enum SerializerError {
    /// The input could not be parsed as JSON at all.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Serializes any `Serialize` value to its EJSON-tagged string form.
///
/// # Errors
/// Returns [`SerializerError::InvalidJson`] if the value cannot be
/// represented as `serde_json::Value` at all (exotic map keys, etc).
pub fn stringify<T: Serialize>(value: &T) -> Result<String, SerializerError> {
    let raw = serde_json::to_value(value)?;
    let ejson = EJson::from_plain_json(&raw);
    Ok(serde_json::to_string(&ejson.to_value())?)
}

/// Parses an EJSON-tagged string back into `T`.
///
/// # Errors
/// Returns [`SerializerError::InvalidJson`] when the string is not valid
/// JSON, or when the decoded shape does not match `T`.
pub fn parse<T: DeserializeOwned>(raw: &str) -> Result<T, SerializerError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let ejson = EJson::from_tagged_json(&value);
    Ok(serde_json::from_value(ejson.to_value())?)
}
