//! The hydrated form of a [`kiln_serializer::FileSentinel`] once its matching
//! multipart part has been read.
//!
//! A hydrated input file exposes a live duplex stream elsewhere; task input
//! in this runtime is plain `serde_json::Value`, so there is nowhere in-band to put
//! a non-serializable handle. Instead the exposure handler publishes the
//! resolved file set through [`crate::context::exposure_files`], the same
//! async-context side channel `kiln-task` already uses for its cancellation
//! signal, and substitutes each sentinel in the manifest with a small JSON
//! descriptor (`{"$runnerFileId": id}`) the task can use to look itself up.

use bytes::Bytes;
use std::path::{Path, PathBuf};

/// A resolved multipart file, keyed by its sentinel id in
/// [`crate::context::ExposureFiles`].
#[derive(Clone)]
pub struct InputFile {
    /// The file name — manifest metadata overrides the multipart-derived one.
    pub name: String,
    /// The MIME type, if known.
    pub content_type: Option<String>,
    /// The size in bytes, if known ahead of time.
    pub size: Option<u64>,
    bytes: Bytes,
}

impl InputFile {
    /// Builds a resolved file from its part bytes and metadata.
    #[must_use]
    pub fn new(name: String, content_type: Option<String>, bytes: Bytes) -> Self {
        let size = Some(bytes.len() as u64);
        Self {
            name,
            content_type,
            size,
            bytes,
        }
    }

    /// Overrides metadata with values from the manifest's sentinel, when
    /// those are non-empty.
    #[must_use]
    pub fn with_manifest_meta(mut self, meta: &kiln_serializer::FileSentinelMeta) -> Self {
        if !meta.name.is_empty() {
            self.name = meta.name.clone();
        }
        if meta.r#type.is_some() {
            self.content_type = meta.r#type.clone();
        }
        if meta.size.is_some() {
            self.size = meta.size;
        }
        self
    }

    /// Reads the whole body into memory. Named `resolve` for call-site parity
    /// with the streaming shape this mirrors; this runtime buffers multipart
    /// parts up front, so it's already resolved by the time a caller asks.
    #[must_use]
    pub fn resolve(&self) -> Bytes {
        self.bytes.clone()
    }

    /// A byte stream over the file's contents.
    pub fn stream(&self) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        futures::stream::once(futures::future::ready(Ok(self.bytes.clone())))
    }

    /// Writes the file to a fresh temporary path under `dir` (or the system
    /// temp directory) and returns it.
    ///
    /// # Errors
    /// Returns an I/O error if the file can't be created or written.
    pub async fn to_temp_file(&self, dir: Option<&Path>) -> std::io::Result<PathBuf> {
        let bytes = self.bytes.clone();
        let dir = dir.map(Path::to_path_buf);
        tokio::task::spawn_blocking(move || {
            use std::io::Write as _;
            let mut builder = tempfile::Builder::new();
            let mut named = match &dir {
                Some(dir) => builder.tempfile_in(dir)?,
                None => builder.tempfile()?,
            };
            named.write_all(&bytes)?;
            named.keep().map(|(_file, path)| path).map_err(|e| e.error)
        })
            .await
            .expect("to_temp_file blocking task panicked")
    }
}
