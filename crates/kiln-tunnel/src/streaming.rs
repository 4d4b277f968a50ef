//! Streaming-response sentinel: the wire form of "a task result that should
//! be piped back as a raw body instead of a JSON envelope".
//!
//! Mirrors [`kiln_serializer::FileSentinel`]'s convention — a reserved
//! marker field on a plain JSON object, recognized depth-free at the top
//! level of a task's result (unlike file sentinels, a streaming response is
//! never nested: it *is* the result, not a value embedded within it).

use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A task result a server should pipe back as a raw HTTP body rather than
/// wrap in `{ ok: true, result }`. Construct with [`StreamingResult::new`]
/// then convert to a [`serde_json::Value`] with [`StreamingResult::into_value`]
/// to return from a task's `run` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamingResult {
    /// Always `true`; the marker a decoder keys off of.
    #[serde(rename = "$runnerStreamingResponse")]
    pub runner_streaming_response: bool,
    /// Base64-encoded body bytes.
    pub body: String,
    /// `content-type` to send; defaults to `application/octet-stream` if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Extra response headers to send alongside `content-type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// HTTP status to respond with; defaults to 200 if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl StreamingResult {
    /// Builds a streaming result carrying `body`, defaulting `content_type`
    /// to `application/octet-stream`.
    #[must_use]
    pub fn new(body: Bytes) -> Self {
        Self {
            runner_streaming_response: true,
            body: base64::engine::general_purpose::STANDARD.encode(&body),
            content_type: Some("application/octet-stream".to_string()),
            headers: None,
            status: None,
        }
    }

    /// Overrides the response `content-type`.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Attaches extra response headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Overrides the response status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Serializes to the `serde_json::Value` a task's `run` body returns.
    ///
    /// # Panics
    /// Never — every field here serializes infallibly.
    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).expect("StreamingResult always serializes")
    }

    /// Decodes `body` back to raw bytes.
    ///
    /// # Errors
    /// Returns the base64 decode error if `body` isn't valid base64 (should
    /// only happen if a task hand-built this value instead of going through
    /// [`StreamingResult::new`]).
    pub fn decode_body(&self) -> Result<Bytes, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.body)
            .map(Bytes::from)
    }
}

/// Recognizes a top-level task result as a [`StreamingResult`], per the
/// `$runnerStreamingResponse` marker.
#[must_use]
pub fn as_streaming_result(value: &serde_json::Value) -> Option<StreamingResult> {
    let object = value.as_object()?;
    if object.get("$runnerStreamingResponse").and_then(serde_json::Value::as_bool) != Some(true) {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let result = StreamingResult::new(Bytes::from_static(b"abc")).with_content_type("text/plain");
        let value = result.clone().into_value();
        let decoded = as_streaming_result(&value).unwrap();
        assert_eq!(decoded, result);
        assert_eq!(decoded.decode_body().unwrap(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn plain_object_is_not_a_streaming_result() {
        assert!(as_streaming_result(&serde_json::json!({ "body": "abc" })).is_none());
    }
}
