//! The smart HTTP client: mirrors the exposure server's transport
//! selection — plain input goes out as JSON, a local file turns the request
//! into multipart, a raw byte body goes out as octet-stream — and re-throws
//! typed errors through the caller's [`ErrorRegistry`].

use std::collections::HashMap;

use bytes::Bytes;
use kiln_core::Id;
use kiln_error::kinds::TunnelErrorCode;
use kiln_error::KilnError;
use kiln_tunnel::{EventRequestBody, EventResultBody, ProtocolEnvelope, ProtocolErrorBody, TaskRequestBody, CONTEXT_HEADER, MANIFEST_PART_NAME};
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::file::OutgoingFile;
use crate::registry::ErrorRegistry;

/// The response shape a task call resolves to.
pub enum TaskResponse {
    /// `{ ok: true, result }` decoded to its value.
    Json(Value),
    /// The server piped a non-JSON body back; buffered in full, since this
    /// client has no partial-read call site to hand a live stream to.
    Stream {
        /// The response's `content-type`, if one was sent.
        content_type: Option<String>,
        /// The full response body.
        bytes: Bytes,
    },
}

/// Mirror of the exposure server. Talks `application/json`,
/// `multipart/form-data`, and `application/octet-stream` depending on the
/// call made, and re-throws typed errors via its [`ErrorRegistry`].
#[derive(Clone)]
pub struct SmartClient {
    http: ReqwestClient,
    config: ClientConfig,
    errors: ErrorRegistry,
    context: Option<Value>,
}

impl SmartClient {
    /// Builds a client over `config`, constructing its own `reqwest::Client`.
    ///
    /// # Errors
    /// Returns [`KilnError::HttpBaseUrlRequired`] if `config.base_url` is empty,
    /// or a generic tunnel error if the underlying `reqwest::Client` fails
    /// to build (e.g. an invalid TLS configuration).
    pub fn new(config: ClientConfig, errors: ErrorRegistry) -> Result<Self, ClientError> {
        if config.base_url.is_empty() {
            return Err(ClientError::Tunnel(KilnError::HttpBaseUrlRequired));
        }
        let http = ReqwestClient::builder().timeout(config.timeout).build().map_err(|e| {
            ClientError::Tunnel(KilnError::Tunnel {
                code: TunnelErrorCode::HttpError,
                message: format!("failed to build HTTP client: {e}"),
                http_code: None,
                id: None,
                data: None,
            })
        })?;
        Ok(Self {
            http,
            config,
            errors,
            context: None,
        })
    }

    /// Attaches an `x-runner-context` value sent with every subsequent
    /// request this client issues.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Sends `input` as a plain JSON task call.
    pub async fn task(&self, id: &Id, input: Value) -> Result<Value, ClientError> {
        let body = TaskRequestBody { input };
        let response = self.post_json(&self.config.task_url(id), &body).await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;
        let envelope = self.parse_envelope(&bytes, status)?;
        self.resolve_envelope(envelope, status)
    }

    /// Sends `input` alongside `files` as `multipart/form-data`:
    /// the `__manifest` part carries `input`, one `file:{id}` part per entry
    /// in `files`. Build `input`'s sentinels with [`crate::file::attach`].
    pub async fn task_with_files(
        &self,
        id: &Id,
        input: Value,
        files: HashMap<String, OutgoingFile>,
    ) -> Result<TaskResponse, ClientError> {
        let manifest = serde_json::to_vec(&TaskRequestBody { input }).map_err(|e| {
            ClientError::Tunnel(KilnError::Tunnel {
                code: TunnelErrorCode::InvalidJson,
                message: format!("failed to serialize task input manifest: {e}"),
                http_code: None,
                id: None,
                data: None,
            })
        })?;

        let manifest_part = reqwest::multipart::Part::bytes(manifest)
            .mime_str("application/json")
            .expect("\"application/json\" is a valid mime type");
        let mut form = reqwest::multipart::Form::new().part(MANIFEST_PART_NAME, manifest_part);

        for (file_id, file) in files {
            let mut part = reqwest::multipart::Part::bytes(file.bytes().to_vec()).file_name(file.name.clone());
            if let Some(content_type) = &file.content_type {
                if let Ok(typed) = part.mime_str(content_type) {
                    part = typed;
                }
            }
            form = form.part(format!("file:{file_id}"), part);
        }

        let request = self.decorate(self.http.post(self.config.task_url(id)).multipart(form));
        let response = request.send().await.map_err(transport_error)?;
        self.decode_task_response(response).await
    }

    /// Sends `body` as `application/octet-stream`. The response may itself be a stream (returned
    /// as-is) or a JSON envelope.
    pub async fn task_stream(&self, id: &Id, body: Bytes, content_type: Option<&str>) -> Result<TaskResponse, ClientError> {
        let request = self
            .http
            .post(self.config.task_url(id))
            .header(reqwest::header::CONTENT_TYPE, content_type.unwrap_or("application/octet-stream"))
            .body(body);
        let response = self.decorate(request).send().await.map_err(transport_error)?;
        self.decode_task_response(response).await
    }

    /// `event(id, payload)` — always a plain JSON POST, ignoring
    /// anything the server might echo back.
    pub async fn event(&self, id: &Id, payload: Value) -> Result<(), ClientError> {
        let body = EventRequestBody {
            payload,
            return_payload: false,
        };
        let response = self.post_json(&self.config.event_url(id), &body).await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;
        let envelope = self.parse_envelope(&bytes, status)?;
        self.resolve_envelope(envelope, status)?;
        Ok(())
    }

    /// `eventWithResult(id, payload)` — sets `returnPayload: true`
    /// and requires the server to echo a result back.
    pub async fn event_with_result(&self, id: &Id, payload: Value) -> Result<Value, ClientError> {
        let body = EventRequestBody {
            payload,
            return_payload: true,
        };
        let response = self.post_json(&self.config.event_url(id), &body).await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;
        let envelope = self.parse_envelope(&bytes, status)?;
        let value = self.resolve_envelope(envelope, status)?;
        let result_body: EventResultBody = serde_json::from_value(value).map_err(|e| {
            ClientError::Tunnel(KilnError::Tunnel {
                code: TunnelErrorCode::InvalidResponse,
                message: format!("event-with-result response missing its result field: {e}"),
                http_code: Some(status.as_u16()),
                id: None,
                data: None,
            })
        })?;
        Ok(result_body.result)
    }

    // -- internals --------------------------------------------------------

    fn decorate(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.config.token {
            request = request.header(self.config.auth_header.as_str(), token.as_str());
        }
        if let Some(context) = &self.context {
            if let Ok(serialized) = serde_json::to_string(context) {
                request = request.header(CONTEXT_HEADER, serialized);
            }
        }
        request
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<reqwest::Response, ClientError> {
        let request = self.decorate(self.http.post(url).json(body));
        request.send().await.map_err(transport_error)
    }

    fn parse_envelope(&self, bytes: &[u8], status: StatusCode) -> Result<ProtocolEnvelope<Value>, ClientError> {
        serde_json::from_slice(bytes).map_err(|_| {
            ClientError::Tunnel(KilnError::Tunnel {
                code: TunnelErrorCode::HttpError,
                message: format!("non-JSON response body (status {status})"),
                http_code: Some(status.as_u16()),
                id: None,
                data: None,
            })
        })
    }

    /// Resolves a decoded envelope to its value, or a [`ClientError`]
    /// reconstructed through this client's [`ErrorRegistry`]. Deliberately
    /// more lenient than [`kiln_tunnel::assert_ok_envelope`]: a successful
    /// envelope whose `result` is legitimately `null` (an event with no
    /// return payload, a task that returns `null`) must not be mistaken for
    /// a malformed response.
    fn resolve_envelope(&self, envelope: ProtocolEnvelope<Value>, status: StatusCode) -> Result<Value, ClientError> {
        if envelope.ok {
            return Ok(envelope.result.unwrap_or(Value::Null));
        }
        let body = envelope.error.unwrap_or_else(|| ProtocolErrorBody {
            code: TunnelErrorCode::InvalidResponse.as_str().to_string(),
            message: "envelope reported failure but carried no error body".to_string(),
            id: None,
            data: None,
        });
        let err = KilnError::Tunnel {
            code: TunnelErrorCode::from_str_lenient(&body.code),
            message: body.message,
            http_code: Some(status.as_u16()),
            id: body.id,
            data: body.data,
        };
        Err(ClientError::from_tunnel(err, &self.errors))
    }

    async fn decode_task_response(&self, response: reqwest::Response) -> Result<TaskResponse, ClientError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_json = content_type.as_deref().is_some_and(|c| c.starts_with("application/json"));
        let bytes = response.bytes().await.map_err(transport_error)?;

        if is_json {
            let envelope = self.parse_envelope(&bytes, status)?;
            let value = self.resolve_envelope(envelope, status)?;
            Ok(TaskResponse::Json(value))
        } else if status.is_success() {
            Ok(TaskResponse::Stream { content_type, bytes })
        } else {
            Err(ClientError::Tunnel(KilnError::Tunnel {
                code: TunnelErrorCode::HttpError,
                message: format!("HTTP {status} with a non-JSON body"),
                http_code: Some(status.as_u16()),
                id: None,
                data: None,
            }))
        }
    }
}

fn transport_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Tunnel(KilnError::Tunnel {
            code: TunnelErrorCode::RequestTimeout,
            message: err.to_string(),
            http_code: Some(408),
            id: None,
            data: None,
        })
    } else {
        ClientError::Tunnel(KilnError::Tunnel {
            code: TunnelErrorCode::HttpError,
            message: err.to_string(),
            http_code: err.status().map(|s| s.as_u16()),
            id: None,
            data: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn task_decodes_a_plain_json_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/__runner/task/greet"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": "hi"})))
            .mount(&server)
            .await;

        let client = SmartClient::new(ClientConfig::new(server.uri()), ErrorRegistry::new()).unwrap();
        let result = client.task(&Id::new("greet"), Value::Null).await.unwrap();
        assert_eq!(result, serde_json::json!("hi"));
    }

    #[tokio::test]
    async fn task_reconstructs_a_registered_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/__runner/task/risky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": {"code": "INTERNAL_ERROR", "message": "no user", "id": "users.notFound", "data": {"user_id": "u1"}}
            })))
            .mount(&server)
            .await;

        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        struct NotFoundData {
            user_id: String,
        }
        let helper = kiln_error::ErrorHelper::new("users.notFound", |d: &NotFoundData| format!("no user {}", d.user_id));
        let registry = ErrorRegistry::new().with_helper(&helper);

        let client = SmartClient::new(ClientConfig::new(server.uri()), registry).unwrap();
        let err = client.task(&Id::new("risky"), Value::Null).await.unwrap_err();
        match err {
            ClientError::Typed(typed) => assert!(helper.is(typed.as_ref())),
            ClientError::Tunnel(_) => panic!("expected a reconstructed typed error"),
        }
    }

    #[tokio::test]
    async fn event_tolerates_a_null_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/__runner/event/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": null})))
            .mount(&server)
            .await;

        let client = SmartClient::new(ClientConfig::new(server.uri()), ErrorRegistry::new()).unwrap();
        client.event(&Id::new("ping"), Value::Null).await.unwrap();
    }
}
