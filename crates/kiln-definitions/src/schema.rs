//! The opaque `parse(x)` callable kiln treats as an external collaborator:
//! kiln never bundles a schema library, it only ever calls
//! `.parse(value) -> Result<Value, String>` on whatever the author attached.

use std::sync::Arc;

use serde_json::Value;

/// A validation schema: a fallible normalizer over a JSON value. Wraps any
/// validation library's `parse`/`validate` entry point without depending on
/// one.
#[derive(Clone)]
pub struct Schema {
    parse: Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>,
}

impl Schema {
    /// Wraps a parse callable as a `Schema`.
    pub fn new(parse: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static) -> Self {
        Self {
            parse: Arc::new(parse),
        }
    }

    /// A schema that accepts everything unchanged — useful as a default
    /// when a unit declares no schema but the calling code wants a
    /// uniform `Option<Schema>::unwrap_or_default()` shape.
    #[must_use]
    pub fn passthrough() -> Self {
        Self::new(|v| Ok(v.clone()))
    }

    /// Runs the schema's `parse` over `value`.
    ///
    /// # Errors
    /// Returns the schema's own error message unchanged; callers wrap it
    /// into `KilnError::Validation` with the subject/unit-id context.
    pub fn parse(&self, value: &Value) -> Result<Value, String> {
        (self.parse)(value)
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Schema(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_accepts_anything() {
        let schema = Schema::passthrough();
        assert_eq!(schema.parse(&serde_json::json!(42)).unwrap(), serde_json::json!(42));
    }

    #[test]
    fn custom_schema_rejects() {
        let schema = Schema::new(|v| {
            if v.is_number() {
                Ok(v.clone())
            } else {
                Err("expected a number".to_string())
            }
        });
        assert!(schema.parse(&serde_json::json!("x")).is_err());
    }
}
