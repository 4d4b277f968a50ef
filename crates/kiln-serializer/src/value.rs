use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Number, Value};

/// The literal substituted for a value that closes a cycle back to an
/// ancestor already on the current serialization path.
const CIRCULAR_PLACEHOLDER: &str = "[Circular]";
/// The literal substituted for a leaf whose conversion to JSON failed.
const UNSERIALIZABLE_PLACEHOLDER: &str = "[Unserializable]";

/// A dynamic value tree that extends plain JSON with three tagged shapes:
/// dates, arbitrary-precision integers, and raw byte strings. See the
/// module docs for the wire format and the cycle-guard behavior.
#[derive(Clone)]
pub enum EJson {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// JSON string.
    String(String),
    /// `{ "__type": "Date", "value": <rfc3339> }`.
    Date(DateTime<Utc>),
    /// `{ "__type": "BigInt", "value": "<decimal>" }`.
    BigInt(i128),
    /// `{ "__type": "Bytes", "value": "<base64>" }`.
    Bytes(Vec<u8>),
    /// A JSON array. Shared behind `Arc<Mutex<_>>` so callers can alias (and,
    /// deliberately, cycle) subtrees when building log payloads.
    Array(Arc<Mutex<Vec<EJson>>>),
    /// A JSON object, same sharing rationale as [`Self::Array`].
    Object(Arc<Mutex<IndexMap<String, EJson>>>),
}

impl EJson {
    /// Wraps a plain value as a single-element convenience constructor.
    #[must_use]
    pub fn array(items: Vec<EJson>) -> Self {
        Self::Array(Arc::new(Mutex::new(items)))
    }

    /// Builds an object from key/value pairs.
    #[must_use]
    pub fn object(entries: Vec<(String, EJson)>) -> Self {
        Self::Object(Arc::new(Mutex::new(entries.into_iter().collect())))
    }

    /// The `"[Unserializable]"` placeholder leaf, used when a fallible
    /// conversion into `EJson` fails.
    #[must_use]
    pub fn unserializable() -> Self {
        Self::String(UNSERIALIZABLE_PLACEHOLDER.to_string())
    }

    /// Makes `child` a member of `self` (an [`Self::Array`]), allowing the
    /// caller to later push a clone of an ancestor back into its own
    /// subtree and construct a genuine cycle for testing the circular-guard.
    ///
    /// # Panics
    /// Panics if `self` is not an [`Self::Array`], or if its mutex is poisoned.
    pub fn push(&self, child: EJson) {
        match self {
            Self::Array(items) => items.lock().unwrap().push(child),
            _ => panic!("EJson::push called on a non-array value"),
        }
    }

    /// Inserts `child` under `key` into `self` (an [`Self::Object`]).
    ///
    /// # Panics
    /// Panics if `self` is not an [`Self::Object`], or if its mutex is poisoned.
    pub fn insert(&self, key: impl Into<String>, child: EJson) {
        match self {
            Self::Object(map) => {
                map.lock().unwrap().insert(key.into(), child);
            }
            _ => panic!("EJson::insert called on a non-object value"),
        }
    }

    /// Converts a plain `serde_json::Value` into an `EJson` tree with no
    /// sentinel upgrades (used by the generic [`crate::stringify`] helper,
    /// which only ever sees what `serde` already flattened to JSON).
    #[must_use]
    pub fn from_plain_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => {
                Self::array(items.iter().map(Self::from_plain_json).collect())
            }
            Value::Object(map) => Self::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_plain_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts a plain `serde_json::Value` into an `EJson` tree, upgrading
    /// any tagged `{ "__type": ..., "value": ... }` object into its native
    /// [`Self::Date`] / [`Self::BigInt`] / [`Self::Bytes`] shape.
    #[must_use]
    pub fn from_tagged_json(value: &Value) -> Self {
        if let Value::Object(map) = value {
            if let Some(Value::String(ty)) = map.get("__type") {
                if let Some(inner) = map.get("value") {
                    match ty.as_str() {
                        "Date" => {
                            if let Some(s) = inner.as_str() {
                                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                                    return Self::Date(dt.with_timezone(&Utc));
                                }
                            }
                        }
                        "BigInt" => {
                            if let Some(s) = inner.as_str() {
                                if let Ok(n) = s.parse::<i128>() {
                                    return Self::BigInt(n);
                                }
                            }
                        }
                        "Bytes" => {
                            if let Some(s) = inner.as_str() {
                                if let Ok(bytes) =
                                    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
                                {
                                    return Self::Bytes(bytes);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            return Self::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_tagged_json(v)))
                    .collect(),
            );
        }
        match value {
            Value::Array(items) => {
                Self::array(items.iter().map(Self::from_tagged_json).collect())
            }
            other => Self::from_plain_json(other),
        }
    }

    /// Converts this tree back into a plain `serde_json::Value`, tagging
    /// sentinel shapes and substituting `"[Circular]"` for any node that
    /// reappears on its own ancestor path.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut path: Vec<usize> = Vec::new();
        self.to_value_guarded(&mut path)
    }

    fn to_value_guarded(&self, path: &mut Vec<usize>) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Date(dt) => tagged("Date", Value::String(dt.to_rfc3339())),
            Self::BigInt(n) => tagged("BigInt", Value::String(n.to_string())),
            Self::Bytes(bytes) => tagged(
                "Bytes",
                Value::String(base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    bytes,
                )),
            ),
            Self::Array(items) => {
                let ptr = Arc::as_ptr(items) as usize;
                if path.contains(&ptr) {
                    return Value::String(CIRCULAR_PLACEHOLDER.to_string());
                }
                path.push(ptr);
                let values = items
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|v| v.to_value_guarded(path))
                    .collect();
                path.pop();
                Value::Array(values)
            }
            Self::Object(map) => {
                let ptr = Arc::as_ptr(map) as usize;
                if path.contains(&ptr) {
                    return Value::String(CIRCULAR_PLACEHOLDER.to_string());
                }
                path.push(ptr);
                let mut out = serde_json::Map::new();
                for (k, v) in map.lock().unwrap().iter() {
                    out.insert(k.clone(), v.to_value_guarded(path));
                }
                path.pop();
                Value::Object(out)
            }
        }
    }

    /// Serializes directly to an EJSON-tagged string.
    #[must_use]
    pub fn stringify(&self) -> String {
        self.to_value().to_string()
    }

    /// Parses an EJSON-tagged string into a tree.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if `raw` is not valid JSON.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::from_tagged_json(&value))
    }

    /// Structural equality over JSON scalar leaves plus Date/BigInt/Bytes,
    /// used by the round-trip property test. Shared/circular subtrees are
    /// compared by their materialized (guarded) JSON form.
    #[must_use]
    pub fn value_eq(&self, other: &Self) -> bool {
        self.to_value() == other.to_value()
    }
}

fn tagged(ty: &'static str, value: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("__type".to_string(), Value::String(ty.to_string()));
    map.insert("value".to_string(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars_and_sentinels() {
        let original = EJson::object(vec![
            ("n".to_string(), EJson::Number(Number::from(42))),
            ("s".to_string(), EJson::String("hi".to_string())),
            (
                "d".to_string(),
                EJson::Date(DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)),
            ),
            ("big".to_string(), EJson::BigInt(123_456_789_012_345)),
            ("bytes".to_string(), EJson::Bytes(vec![1, 2, 3, 255])),
        ]);

        let text = original.stringify();
        let parsed = EJson::parse(&text).unwrap();
        assert!(original.value_eq(&parsed));
    }

    #[test]
    fn circular_array_serializes_to_placeholder() {
        let outer = EJson::array(vec![]);
        outer.push(EJson::String("first".to_string()));
        outer.push(outer.clone());

        let value = outer.to_value();
        let arr = value.as_array().unwrap();
        assert_eq!(arr[0], Value::String("first".to_string()));
        assert_eq!(arr[1], Value::String("[Circular]".to_string()));
    }

    #[test]
    fn circular_object_serializes_to_placeholder() {
        let outer = EJson::object(vec![]);
        outer.insert("name", EJson::String("root".to_string()));
        outer.insert("self", outer.clone());

        let value = outer.to_value();
        assert_eq!(value["self"], Value::String("[Circular]".to_string()));
    }
}
