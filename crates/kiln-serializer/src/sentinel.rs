use serde::{Deserialize, Serialize};

/// The serialized form of a multipart file reference: a placeholder
/// embedded in a JSON manifest that the exposure server swaps out for a live
/// `InputFile` once it has read the matching `file:{id}` part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSentinel {
    /// Always `"File"`; present so a generic decoder can distinguish this
    /// from an ordinary object that happens to have an `id` field.
    #[serde(rename = "$runnerFile")]
    pub runner_file: String,
    /// The id correlating this sentinel with its `file:{id}` multipart part.
    pub id: String,
    /// Metadata describing the file; overrides multipart-derived values.
    pub meta: FileSentinelMeta,
}

impl FileSentinel {
    /// Builds a new sentinel for `id`.
    #[must_use]
    pub fn new(id: impl Into<String>, meta: FileSentinelMeta) -> Self {
        Self {
            runner_file: "File".to_string(),
            id: id.into(),
            meta,
        }
    }

    /// The multipart part name this sentinel expects: `file:{id}`.
    #[must_use]
    pub fn part_name(&self) -> String {
        format!("file:{}", self.id)
    }
}

/// Metadata carried alongside a [`FileSentinel`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSentinelMeta {
    /// The file name.
    pub name: String,
    /// The MIME type, if known ahead of time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    /// The file size in bytes, if known ahead of time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// The source's last-modified timestamp (epoch millis), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    /// Arbitrary extra metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}
