//! Outbound local file attachments.
//!
//! The mirror of `kiln-exposure`'s [`InputFile`](https://docs.rs/kiln-exposure):
//! that crate resolves a `file:{id}` multipart part *into* a value the task
//! reads; this one turns a local byte source *into* a `file:{id}` part plus
//! the `{ "$runnerFile": "File", id, meta }` sentinel the caller embeds in
//! its input, so [`crate::smart::SmartClient`] knows to build a multipart
//! body instead of a plain JSON one.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use kiln_serializer::{FileSentinel, FileSentinelMeta};
use serde_json::Value;

/// A local file (or in-memory byte buffer) waiting to be sent as a
/// multipart part.
#[derive(Clone)]
pub struct OutgoingFile {
    /// The file name, carried in the sentinel's `meta.name`.
    pub name: String,
    /// The MIME type, if known.
    pub content_type: Option<String>,
    bytes: Bytes,
}

impl OutgoingFile {
    /// Builds an outgoing file from an in-memory buffer.
    #[must_use]
    pub fn new(name: impl Into<String>, content_type: Option<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type,
            bytes: bytes.into(),
        }
    }

    /// Reads the whole file at `path` into memory. The file name defaults
    /// to `path`'s final component.
    ///
    /// # Errors
    /// Returns an I/O error if the file can't be read.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(name, None, bytes))
    }

    pub(crate) fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub(crate) fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Registers `file` under a fresh sentinel id in `files`, returning the
/// `{ $runnerFile, id, meta }` JSON value to embed at the appropriate spot
/// in the task input manifest.
pub fn attach(files: &mut HashMap<String, OutgoingFile>, file: OutgoingFile) -> Value {
    let id = uuid::Uuid::new_v4().to_string();
    let sentinel = FileSentinel::new(
        id.clone(),
        FileSentinelMeta {
            name: file.name.clone(),
            r#type: file.content_type.clone(),
            size: Some(file.size()),
            last_modified: None,
            extra: None,
        },
    );
    files.insert(id, file);
    serde_json::to_value(sentinel).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_registers_the_file_under_the_sentinels_id() {
        let mut files = HashMap::new();
        let sentinel = attach(&mut files, OutgoingFile::new("a.txt", Some("text/plain".to_string()), Bytes::from_static(b"hi")));
        let id = sentinel.get("id").and_then(Value::as_str).unwrap().to_string();
        assert_eq!(sentinel.get("$runnerFile").and_then(Value::as_str), Some("File"));
        assert!(files.contains_key(&id));
    }
}
