//! Multipart manifest handling:
//! the `__manifest` part carries the JSON input with [`FileSentinel`]
//! placeholders; the matching `file:{id}` parts carry the actual bytes. This
//! module only walks the manifest tree to find sentinels — `kiln-exposure`
//! owns swapping them for a live stream, `kiln-client` owns building the
//! reverse direction from local sources.

use kiln_serializer::FileSentinel;
use serde_json::Value;

/// Walks `value` depth-first collecting every embedded [`FileSentinel`],
/// in document order. A sentinel is recognized by its `$runnerFile: "File"`
/// marker field, so this doesn't need to know the manifest's outer shape.
#[must_use]
pub fn find_sentinels(value: &Value) -> Vec<FileSentinel> {
    let mut found = Vec::new();
    walk(value, &mut found);
    found
}

fn walk(value: &Value, found: &mut Vec<FileSentinel>) {
    match value {
        Value::Object(map) => {
            if map.get("$runnerFile").and_then(Value::as_str) == Some("File") {
                if let Ok(sentinel) = serde_json::from_value::<FileSentinel>(value.clone()) {
                    found.push(sentinel);
                    return;
                }
            }
            for child in map.values() {
                walk(child, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, found);
            }
        }
        _ => {}
    }
}

/// Replaces every sentinel in `value` matching `sentinel.id` with
/// `replacement`, depth-first. Used by the exposure server once a
/// multipart part has been read into a live value, and by tests asserting
/// a manifest round-trips.
pub fn replace_sentinel(value: &mut Value, sentinel_id: &str, replacement: Value) {
    match value {
        Value::Object(map) => {
            if map.get("$runnerFile").and_then(Value::as_str) == Some("File")
            && map.get("id").and_then(Value::as_str) == Some(sentinel_id)
            {
                *value = replacement;
                return;
            }
            for child in map.values_mut() {
                replace_sentinel(child, sentinel_id, replacement.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_sentinel(item, sentinel_id, replacement.clone());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_serializer::FileSentinelMeta;

    #[test]
    fn finds_nested_sentinels() {
        let sentinel = FileSentinel::new("f1", FileSentinelMeta {
            name: "a.txt".to_string(),
            ..Default::default()
        });
        let manifest = serde_json::json!({
            "input": {
                "attachment": serde_json::to_value(&sentinel).unwrap(),
                "other": [1, 2, 3],
            }
        });
        let found = find_sentinels(&manifest);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "f1");
        assert_eq!(found[0].part_name(), "file:f1");
    }

    #[test]
    fn replaces_sentinel_in_place() {
        let sentinel = FileSentinel::new("f1", FileSentinelMeta {
            name: "a.txt".to_string(),
            ..Default::default()
        });
        let mut manifest = serde_json::json!({ "attachment": serde_json::to_value(&sentinel).unwrap() });
        replace_sentinel(&mut manifest, "f1", serde_json::json!("resolved"));
        assert_eq!(manifest, serde_json::json!({ "attachment": "resolved" }));
    }

    #[test]
    fn no_sentinels_in_plain_value() {
        assert!(find_sentinels(&serde_json::json!({"a": 1, "b": [1, 2]})).is_empty());
    }
}
