//! The mixed client composes the other two: stream-or-file inputs go to the
//! smart client, plain inputs go through a JSON-only call shape. A
//! `forceSmart` predicate can route selected ids through the smart client
//! even for plain input, for the case where the server's *response* comes
//! back streamed rather than the request.
//!
//! A browser has two distinct transport primitives — `fetch` for plain
//! JSON, something richer for multipart/streamed uploads. `reqwest` has no
//! such split: every request in this crate already goes through the one
//! [`SmartClient`]. So here "plain" and "smart" collapse to two call shapes
//! against that single client — [`SmartClient::task`] (JSON-only, the
//! `fetch` case) versus [`SmartClient::task_with_files`]/
//! [`SmartClient::task_stream`] (content-type sniffed, the case a forced or
//! file-bearing call needs) — rather than two separate HTTP clients.
//! `forceSmart`/the allow-list below decide which shape a plain-JSON call
//! takes, which is exactly what matters when the *response* might come back
//! as a stream.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use kiln_core::Id;
use serde_json::Value;

use crate::error::ClientError;
use crate::file::OutgoingFile;
use crate::smart::{SmartClient, TaskResponse};

/// How a [`MixedClient`] call should be shaped.
pub enum MixedInput {
    /// No local files, no forced streaming response: a plain JSON POST.
    Json(Value),
    /// `input` transitively contains file sentinels built with
    /// [`crate::file::attach`]; `files` carries their bytes.
    WithFiles(Value, HashMap<String, OutgoingFile>),
    /// A raw byte body, sent as `application/octet-stream`.
    Stream(Bytes, Option<String>),
}

/// A [`MixedClient::task`] result: the decoded JSON result, or a buffered
/// non-JSON response body the server sent back instead.
pub enum MixedResponse {
    /// `{ ok: true, result }` decoded to its value.
    Json(Value),
    /// A non-JSON body, buffered whole.
    Stream {
        /// The response's `content-type`, if one was sent.
        content_type: Option<String>,
        /// The full response body.
        bytes: Bytes,
    },
}

impl From<TaskResponse> for MixedResponse {
    fn from(response: TaskResponse) -> Self {
        match response {
            TaskResponse::Json(value) => Self::Json(value),
            TaskResponse::Stream { content_type, bytes } => Self::Stream { content_type, bytes },
        }
    }
}

/// Decides whether a plain-input call should still go through the
/// smart/stream-capable transport.
#[derive(Clone)]
pub enum ForceSmart {
    /// Force every id, or none.
    Always(bool),
    /// Force ids this predicate accepts.
    Predicate(Arc<dyn Fn(&Id) -> bool + Send + Sync>),
}

impl Default for ForceSmart {
    fn default() -> Self {
        Self::Always(false)
    }
}

impl ForceSmart {
    fn applies_to(&self, id: &Id) -> bool {
        match self {
            Self::Always(force) => *force,
            Self::Predicate(predicate) => predicate(id),
        }
    }
}

/// Composes [`SmartClient`] call shapes behind one entry point, selecting
/// between the JSON-only and stream-capable shapes per call.
#[derive(Clone)]
pub struct MixedClient {
    smart: SmartClient,
    force_smart: ForceSmart,
    /// Per-id allow-list additionally forcing the stream-capable shape —
    /// advisory, so it only ever widens `force_smart`, never narrows it.
    smart_allow_list: std::collections::HashSet<Id>,
}

impl MixedClient {
    /// Wraps `smart`, defaulting `forceSmart` to `false` and the allow-list
    /// to empty.
    #[must_use]
    pub fn new(smart: SmartClient) -> Self {
        Self {
            smart,
            force_smart: ForceSmart::default(),
            smart_allow_list: std::collections::HashSet::new(),
        }
    }

    /// Sets the `forceSmart` heuristic.
    #[must_use]
    pub fn with_force_smart(mut self, force_smart: ForceSmart) -> Self {
        self.force_smart = force_smart;
        self
    }

    /// Adds ids that always use the stream-capable shape, alongside
    /// whatever `forceSmart` already decided.
    #[must_use]
    pub fn with_smart_allow_list(mut self, ids: impl IntoIterator<Item = Id>) -> Self {
        self.smart_allow_list.extend(ids);
        self
    }

    fn should_force_smart(&self, id: &Id) -> bool {
        self.force_smart.applies_to(id) || self.smart_allow_list.contains(id)
    }

    /// `task(id, input)`: routes `input` to the shape it needs —
    /// files and raw streams always go through the stream-capable
    /// transport; a plain JSON input does too when `id` is forced or
    /// allow-listed, otherwise it takes the JSON-only `fetch` shape.
    ///
    /// # Errors
    /// See [`SmartClient::task`]/[`SmartClient::task_with_files`]/[`SmartClient::task_stream`].
    pub async fn task(&self, id: &Id, input: MixedInput) -> Result<MixedResponse, ClientError> {
        match input {
            MixedInput::Json(value) if self.should_force_smart(id) => {
                Ok(self.smart.task_with_files(id, value, HashMap::new()).await?.into())
            }
            MixedInput::Json(value) => Ok(MixedResponse::Json(self.smart.task(id, value).await?)),
            MixedInput::WithFiles(value, files) => Ok(self.smart.task_with_files(id, value, files).await?.into()),
            MixedInput::Stream(body, content_type) => {
                Ok(self.smart.task_stream(id, body, content_type.as_deref()).await?.into())
            }
        }
    }

    /// `event(id, payload)`: always a plain JSON POST, `forceSmart`
    /// has no effect — an event never streams a response.
    ///
    /// # Errors
    /// See [`SmartClient::event`].
    pub async fn event(&self, id: &Id, payload: Value) -> Result<(), ClientError> {
        self.smart.event(id, payload).await
    }

    /// `eventWithResult(id, payload)`.
    ///
    /// # Errors
    /// See [`SmartClient::event_with_result`].
    pub async fn event_with_result(&self, id: &Id, payload: Value) -> Result<Value, ClientError> {
        self.smart.event_with_result(id, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::registry::ErrorRegistry;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: String) -> MixedClient {
        let smart = SmartClient::new(ClientConfig::new(uri), ErrorRegistry::new()).unwrap();
        MixedClient::new(smart)
    }

    #[tokio::test]
    async fn plain_json_input_takes_the_json_only_shape_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/__runner/task/greet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": "hi"})))
            .mount(&server)
            .await;

        let mixed = client(server.uri());
        let response = mixed.task(&Id::new("greet"), MixedInput::Json(Value::Null)).await.unwrap();
        match response {
            MixedResponse::Json(value) => assert_eq!(value, serde_json::json!("hi")),
            MixedResponse::Stream { .. } => panic!("expected a JSON response"),
        }
    }

    #[tokio::test]
    async fn force_smart_always_routes_plain_input_through_the_stream_capable_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/__runner/task/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"raw-bytes".to_vec()).insert_header("content-type", "application/octet-stream"))
            .mount(&server)
            .await;

        let mixed = client(server.uri()).with_force_smart(ForceSmart::Always(true));
        let response = mixed.task(&Id::new("download"), MixedInput::Json(Value::Null)).await.unwrap();
        match response {
            MixedResponse::Stream { bytes, .. } => assert_eq!(bytes.as_ref(), b"raw-bytes"),
            MixedResponse::Json(_) => panic!("expected a streamed response"),
        }
    }

    #[tokio::test]
    async fn allow_list_widens_force_smart_without_a_predicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/__runner/task/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bytes".to_vec()).insert_header("content-type", "application/octet-stream"))
            .mount(&server)
            .await;

        let mixed = client(server.uri()).with_smart_allow_list([Id::new("download")]);
        let response = mixed.task(&Id::new("download"), MixedInput::Json(Value::Null)).await.unwrap();
        assert!(matches!(response, MixedResponse::Stream { .. }));
    }
}
