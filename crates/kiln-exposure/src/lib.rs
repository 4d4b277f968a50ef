//! # Kiln Exposure
//!
//! The axum router exposing a runtime's tasks/events over HTTP:
//! path scheme, bearer auth, CORS, content-type-driven body parsing
//! (JSON/multipart/octet-stream), async-context hydration, and the
//! tunnel allow-list that scopes which ids a request may reach.
//!
//! The pieces are intentionally split the way `kiln-tunnel`'s doc comment
//! describes the server/client split: [`auth`], [`config`], [`context`],
//! [`error`], and [`file`] are pure, independently testable modules; this
//! file is the thin axum glue wiring them to a live [`Store`] +
//! [`TaskRunner`] + [`EventManager`].

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod file;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter};
use axum::{Json, Router};
use base64::Engine as _;
use futures::StreamExt;
use kiln_core::{tunnel_tag_id, Id};
use kiln_definitions::dependencies::BoxFuture;
use kiln_error::KilnError;
use kiln_eventbus::EventManager;
use kiln_store::Store;
use kiln_task::{RunOptions, TaskRunner};
use kiln_tunnel::{
    EventRequestBody, EventResultBody, ProtocolEnvelope, TaskRequestBody, CONTEXT_HEADER, MANIFEST_PART_NAME,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub use config::{CorsConfig, CorsOrigin, ExposureConfig};
pub use context::ContextRegistry;
pub use error::ExposureError;
pub use file::InputFile;

/// The union of task/event ids every registered server-mode tunnel covers.
/// Computed once at server build time since the store's resource set
/// doesn't change post-init.
struct AllowList {
    tasks: std::collections::HashSet<Id>,
    events: std::collections::HashSet<Id>,
    /// `dangerouslyAllowOpenExposure` was set: every registered id is
    /// admitted regardless of the tunnel union below.
    open: bool,
}

impl AllowList {
    fn admits_task(&self, id: &Id) -> bool {
        self.open || self.tasks.contains(id)
    }

    fn admits_event(&self, id: &Id) -> bool {
        self.open || self.events.contains(id)
    }
}

/// Builds the allow-list by scanning `store` for resources tagged
/// [`kiln_core::tunnel_tag_id`] whose initialized value implements
/// [`kiln_tunnel::TunnelRoutes`] in server mode.
fn build_allow_list(store: &Store, open_exposure: bool) -> AllowList {
    let tunnel_tag = tunnel_tag_id();
    let mut tasks = std::collections::HashSet::new();
    let mut events = std::collections::HashSet::new();

    for entry in &store.resources {
        let resource_id = entry.key().clone();
        if !store.visibility.tags_of(&resource_id).contains(&tunnel_tag) {
            continue;
        }
        let Some(value) = entry.value().value() else {
            continue;
        };
        let Ok(routes) = value.downcast::<Arc<dyn kiln_tunnel::TunnelRoutes>>() else {
            continue;
        };
        if routes.mode() != kiln_tunnel::TunnelMode::Server {
            continue;
        }
        tasks.extend(routes.tasks());
        events.extend(routes.events());
    }

    AllowList {
        tasks,
        events,
        open: open_exposure,
    }
}

/// The state shared across every route handler.
struct ExposureState {
    store: Arc<Store>,
    tasks: Arc<TaskRunner>,
    events: Arc<EventManager>,
    config: ExposureConfig,
    contexts: ContextRegistry,
    allow_list: AllowList,
}

/// Builds the exposure router over an already-initialized [`Store`],
/// [`TaskRunner`], and [`EventManager`].
///
/// # Errors
/// Returns [`KilnError::ExposureMissingToken`] if `config` requires a
/// token and none is configured.
pub fn build_router(
    store: Arc<Store>,
    tasks: Arc<TaskRunner>,
    events: Arc<EventManager>,
    config: ExposureConfig,
    contexts: ContextRegistry,
) -> Result<Router, KilnError> {
    if config.requires_token() {
        return Err(KilnError::ExposureMissingToken);
    }

    let allow_list = build_allow_list(&store, config.dangerously_allow_open_exposure);
    let base = config.base_path.trim_end_matches('/').to_string();
    let state = Arc::new(ExposureState {
        store,
        tasks,
        events,
        contexts,
        allow_list,
        config,
    });

    Ok(Router::new()
            .route(&format!("{base}/task/{{id}}"), on(MethodFilter::all(), handle_task))
            .route(&format!("{base}/event/{{id}}"), on(MethodFilter::all(), handle_event))
            .fallback(fallback)
            .layer(TraceLayer::new_for_http())
            .with_state(state))
}

async fn fallback() -> Response {
    ExposureError::not_found("path is outside the exposed base path").into_response()
}

async fn handle_task(State(state): State<Arc<ExposureState>>, Path(id): Path<String>, request: Request) -> Response {
    let cors_headers = cors_response_headers(&state.config.cors, request.headers());
    let inner_state = Arc::clone(&state);
    let outcome = dispatch(&state, request, move |context_header, request| {
        let state = inner_state;
        async move { run_task(&state, &Id::new(id), request, context_header).await }
    })
        .await;
    apply_headers(outcome.unwrap_or_else(|response| response), cors_headers)
}

async fn handle_event(State(state): State<Arc<ExposureState>>, Path(id): Path<String>, request: Request) -> Response {
    let cors_headers = cors_response_headers(&state.config.cors, request.headers());
    let inner_state = Arc::clone(&state);
    let outcome = dispatch(&state, request, move |context_header, request| {
        let state = inner_state;
        async move { run_event(&state, &Id::new(id), request, context_header).await }
    })
        .await;
    apply_headers(outcome.unwrap_or_else(|response| response), cors_headers)
}

/// Cancels `token` when dropped, unless [`CancelGuard::disarm`] was called
/// first.
///
/// Axum/hyper drop the in-flight request future — rather than keep polling
/// it — when the client resets the connection mid-request; there is no
/// `req "aborted"` event to subscribe to the way there is on a Node HTTP
/// server. Tying cancellation to this guard's `Drop` is how that becomes
/// observable: [`dispatch`] runs the actual work on its own spawned task, so
/// dropping the handler future (the guard along with it) doesn't just
/// silently abandon in-flight task execution — it fires the same
/// cancellation token the spawned task's `TaskRunner::run` call is racing
/// against, so the task is preempted instead of running to completion for a
/// client that is no longer there to receive the response.
struct CancelGuard {
    token: CancellationToken,
    armed: bool,
}

impl CancelGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

/// Shared pre-amble for both route handlers: CORS preflight short circuit
/// (the router's `on(...)` admits POST and OPTIONS only), auth, and
/// `x-runner-context` extraction, then hands off to `inner` — spawned on its
/// own task, racing independently of this future's own lifetime — within
/// the per-request cancellation signal's async-context scope. See
/// [`CancelGuard`] for how a client disconnect actually reaches that signal.
async fn dispatch<F, Fut>(
    state: &ExposureState,
    request: Request,
    inner: F,
) -> Result<Response, Response>
where
    F: FnOnce(Option<Value>, Request) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<Response, ExposureError>> + Send + 'static,
{
    if request.method() == Method::OPTIONS {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    if request.method() != Method::POST {
        return Err(ExposureError::method_not_allowed().into_response());
    }

    auth::check(request.headers(), &state.config).map_err(IntoResponse::into_response)?;

    let context_header = request
        .headers()
        .get(CONTEXT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok());

    let signal = CancellationToken::new();
    let mut guard = CancelGuard::new(signal.clone());
    let work = kiln_task::cancellation_signal().provide(signal, inner(context_header, request));

    let result = match tokio::spawn(work).await {
        Ok(result) => result,
        Err(_) => Err(ExposureError::internal("task execution panicked")),
    };
    guard.disarm();
    result.map_err(IntoResponse::into_response)
}

async fn run_task(
    state: &ExposureState,
    id: &Id,
    request: Request,
    context_header: Option<Value>,
) -> Result<Response, ExposureError> {
    if !state.allow_list.admits_task(id) {
        return Err(not_found_or_forbidden(state.store.tasks.contains_key(id), id));
    }

    let content_type = content_type_of(&request);
    let (input, files) = read_task_input(request, &content_type).await?;

    let tasks = Arc::clone(&state.tasks);
    let id = id.clone();
    // Threading the request's own cancellation signal through as
    // `RunOptions.signal` (rather than leaving the task body to notice it
    // was cancelled on its own) means `TaskRunner::run`'s internal race
    // preempts the task the moment the signal fires, whether or not the
    // task ever checks `kiln_task::cancellation_signal()` itself.
    let signal = kiln_task::cancellation_signal().try_use();
    let run: BoxFuture<'static, Result<Value, KilnError>> =
        Box::pin(async move { tasks.run(&id, input, RunOptions { signal }).await });

    let with_files: BoxFuture<'static, Result<Value, KilnError>> = match files {
        Some(files) => {
            let files = Arc::new(files);
            Box::pin(async move { context::exposure_files().provide(files, run).await })
        }
        None => run,
    };

    let hydrated = match context_header {
        Some(header) if state.config.allow_async_context => state.contexts.hydrate(&header, with_files),
        _ => with_files,
    };

    let result = hydrated.await?;
    Ok(task_response(result))
}

/// Builds the HTTP response for a task result per "Response shapes": a
/// [`kiln_tunnel::StreamingResult`] sentinel is piped back as a raw body
/// with its own content-type/headers/status; anything else is wrapped in
/// the usual `{ ok: true, result }` JSON envelope.
fn task_response(result: Value) -> Response {
    let Some(streaming) = kiln_tunnel::as_streaming_result(&result) else {
        return Json(ProtocolEnvelope::ok(result)).into_response();
    };

    let body = match streaming.decode_body() {
        Ok(bytes) => bytes,
        Err(e) => return ExposureError::internal(format!("invalid streaming response body: {e}")).into_response(),
    };
    let status = streaming
        .status
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);
    let content_type = streaming.content_type.clone().unwrap_or_else(|| "application/octet-stream".to_string());

    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            headers.insert(axum::http::header::CONTENT_TYPE, value);
        }
        for (name, value) in streaming.headers.into_iter().flatten() {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(&value)) {
                headers.insert(name, value);
            }
        }
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| ExposureError::internal("invalid streaming response headers").into_response())
}

async fn run_event(
    state: &ExposureState,
    id: &Id,
    request: Request,
    context_header: Option<Value>,
) -> Result<Response, ExposureError> {
    if !state.allow_list.admits_event(id) {
        return Err(not_found_or_forbidden(state.store.events.contains_key(id), id));
    }

    let bytes = read_body(request).await?;
    let body: EventRequestBody = if bytes.is_empty() {
        EventRequestBody::default()
    } else {
        serde_json::from_slice(&bytes).map_err(|e| ExposureError::invalid_json(e.to_string()))?
    };

    let events = Arc::clone(&state.events);
    let payload = body.payload.clone();
    let id_owned = id.clone();
    let emit: BoxFuture<'static, Result<Value, KilnError>> = Box::pin(async move {
        events.emit(&id_owned, payload, Some("exposure:http".to_string())).await?;
        Ok(Value::Null)
    });

    let hydrated = match context_header {
        Some(header) if state.config.allow_async_context => state.contexts.hydrate(&header, emit),
        _ => emit,
    };
    hydrated.await?;

    let result = if body.return_payload {
        serde_json::to_value(EventResultBody { result: body.payload }).unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    Ok(Json(ProtocolEnvelope::ok(result)).into_response())
}

fn not_found_or_forbidden(registered: bool, id: &Id) -> ExposureError {
    if registered {
        ExposureError::forbidden(format!("\"{id}\" is outside the tunnel allow-list"))
    } else {
        ExposureError::not_found(format!("\"{id}\" is not registered"))
    }
}

enum ContentKind {
    Json,
    Multipart(String),
    OctetStream,
    Empty,
}

fn content_type_of(request: &Request) -> ContentKind {
    let header = request
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if header.starts_with("application/json") {
        ContentKind::Json
    } else if header.starts_with("multipart/form-data") {
        ContentKind::Multipart(header.to_string())
    } else if header.starts_with("application/octet-stream") {
        ContentKind::OctetStream
    } else {
        ContentKind::Empty
    }
}

async fn read_body(request: Request) -> Result<bytes::Bytes, ExposureError> {
    axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| ExposureError::invalid_json(e.to_string()))
}

/// Reads the task input per "Request body", returning the parsed
/// input value plus any resolved multipart files keyed by sentinel id.
async fn read_task_input(
    request: Request,
    content_type: &ContentKind,
) -> Result<(Value, Option<HashMap<String, InputFile>>), ExposureError> {
    match content_type {
        ContentKind::Json | ContentKind::Empty => {
            let bytes = read_body(request).await?;
            if bytes.is_empty() {
                return Ok((Value::Null, None));
            }
            let body: TaskRequestBody = serde_json::from_slice(&bytes)
                .map_err(|e| ExposureError::invalid_json(e.to_string()))?;
            Ok((body.input, None))
        }
        ContentKind::OctetStream => {
            let bytes = read_body(request).await?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            Ok((Value::String(encoded), None))
        }
        ContentKind::Multipart(content_type) => read_multipart_input(request, content_type).await,
    }
}

async fn read_multipart_input(
    request: Request,
    content_type: &str,
) -> Result<(Value, Option<HashMap<String, InputFile>>), ExposureError> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| ExposureError::invalid_multipart(e.to_string()))?;
    let body_stream = request.into_body().into_data_stream().map(|r| r.map_err(std::io::Error::other));
    let mut multipart = multer::Multipart::new(body_stream, boundary);

    let mut manifest: Option<Value> = None;
    let mut parts: HashMap<String, (Option<String>, Option<String>, bytes::Bytes)> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ExposureError::invalid_multipart(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let mime = field.content_type().map(|m| m.essence_str().to_string());
        let data = field.bytes().await.map_err(|e| ExposureError::invalid_multipart(e.to_string()))?;

        match name.as_deref() {
            Some(MANIFEST_PART_NAME) => {
                manifest = Some(
                    serde_json::from_slice(&data).map_err(|e| ExposureError::invalid_multipart(e.to_string()))?,
                );
            }
            Some(other) => {
                parts.insert(other.to_string(), (file_name, mime, data));
            }
            None => {}
        }
    }

    let Some(mut manifest) = manifest else {
        return Err(ExposureError::missing_manifest());
    };

    let sentinels = kiln_tunnel::manifest::find_sentinels(&manifest);
    let mut resolved = HashMap::new();
    for sentinel in &sentinels {
        let part_name = sentinel.part_name();
        let Some((file_name, mime, data)) = parts.remove(&part_name) else {
            return Err(ExposureError::missing_file_part(&sentinel.id));
        };
        let input_file = InputFile::new(file_name.unwrap_or_else(|| sentinel.meta.name.clone()), mime, data)
            .with_manifest_meta(&sentinel.meta);
        kiln_tunnel::manifest::replace_sentinel(
            &mut manifest,
            &sentinel.id,
            serde_json::json!({ "$runnerFileId": sentinel.id }),
        );
        resolved.insert(sentinel.id.clone(), input_file);
    }

    // The manifest wraps the task input the same way a JSON body does
    // (`{ "input":... }`), so the sentinel-substituted tree has one more
    // level of nesting than what the task actually receives.
    let input = manifest.get_mut("input").map(Value::take).unwrap_or(Value::Null);
    Ok((input, Some(resolved)))
}

/// Computes the `Access-Control-*` headers for one response, per
/// "CORS". Returns an empty set when the request's origin doesn't match a
/// `Many`/`Predicate` policy (the browser then enforces same-origin on its
/// own, since no `Access-Control-Allow-Origin` header was sent).
fn cors_response_headers(cors: &CorsConfig, headers: &HeaderMap) -> Vec<(HeaderName, String)> {
    let mut out = Vec::new();
    let requested_origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let (origin_value, dynamic) = match &cors.origin {
        CorsOrigin::Any => ("*".to_string(), false),
        CorsOrigin::One(origin) => (origin.clone(), true),
        CorsOrigin::Many(list) => {
            if list.iter().any(|o| o == requested_origin) {
                (requested_origin.to_string(), true)
            } else {
                return out;
            }
        }
        CorsOrigin::Predicate(predicate) => {
            if predicate(requested_origin) {
                (requested_origin.to_string(), true)
            } else {
                return out;
            }
        }
    };

    out.push((HeaderName::from_static("access-control-allow-origin"), origin_value));
    if dynamic {
        out.push((axum::http::header::VARY, "Origin".to_string()));
    }
    out.push((
        HeaderName::from_static("access-control-allow-methods"),
        cors.methods.join(", "),
    ));

    let requested_headers = headers
        .get(axum::http::header::ACCESS_CONTROL_REQUEST_HEADERS)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let allowed_headers = cors
        .allowed_headers
        .as_ref()
        .map(|h| h.join(", "))
        .unwrap_or_else(|| requested_headers.to_string());
    if !allowed_headers.is_empty() {
        out.push((HeaderName::from_static("access-control-allow-headers"), allowed_headers));
    }

    if !cors.exposed_headers.is_empty() {
        out.push((
            HeaderName::from_static("access-control-expose-headers"),
            cors.exposed_headers.join(", "),
        ));
    }
    if cors.credentials {
        out.push((HeaderName::from_static("access-control-allow-credentials"), "true".to_string()));
    }
    if let Some(max_age) = cors.max_age {
        out.push((HeaderName::from_static("access-control-max-age"), max_age.as_secs().to_string()));
    }

    out
}

fn apply_headers(mut response: Response, headers: Vec<(HeaderName, String)>) -> Response {
    for (name, value) in headers {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// Common prelude.
pub mod prelude {
    pub use crate::{build_router, ContextRegistry, CorsConfig, CorsOrigin, ExposureConfig, ExposureError, InputFile};
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request as HttpRequest;
    use http_body_util::BodyExt as _;
    use kiln_definitions::dependencies::{DepSpec, DynValue};
    use kiln_definitions::{Deps, Item, Resource, Task};
    use kiln_store::DepsResolver;
    use tower::ServiceExt as _;

    struct NullResolver;
    impl DepsResolver for NullResolver {
        fn resolve(&self, _spec: Option<&DepSpec>, _config: &Value) -> Result<Deps, KilnError> {
            Ok(Deps::empty())
        }
    }

    /// Builds a router over a store with one task (`t.sum`) and one event
    /// (`e.pinged`, with a hook recording every emission), per the harness
    /// shape `kiln-task`'s own unit tests use.
    fn harness(config: ExposureConfig) -> Router {
        let sum = Arc::new(Task::new("t.sum", |input, _deps| {
            Box::pin(async move {
                let a = input.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = input.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok(serde_json::json!(a + b))
            })
        }));
        let echo_file = Arc::new(Task::new("t.echoFile", |input, _deps| {
            Box::pin(async move {
                let files = context::exposure_files().try_use();
                let Some(files) = files else {
                    return Ok(Value::Null);
                };
                let Some(descriptor) = input.get("file").and_then(|v| v.get("$runnerFileId")).and_then(Value::as_str)
                else {
                    return Ok(Value::Null);
                };
                let Some(file) = files.get(descriptor) else {
                    return Ok(Value::Null);
                };
                Ok(serde_json::json!({ "name": file.name, "type": file.content_type }))
            })
        }));
        let stream = Arc::new(Task::new("t.stream", |_input, _deps| {
            Box::pin(async move {
                Ok(kiln_tunnel::StreamingResult::new(bytes::Bytes::from_static(b"raw bytes"))
                    .with_content_type("text/plain")
                    .into_value())
            })
        }));
        let root = Arc::new(
            Resource::new("root", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) }))
                .with_register(vec![Item::Task(sum), Item::Task(echo_file), Item::Task(stream)]),
        );
        let store = Arc::new(Store::build(root, Value::Null).unwrap());
        store.finalize().unwrap();
        let resolver = Arc::new(NullResolver);
        let tasks = Arc::new(TaskRunner::new(Arc::clone(&store), resolver.clone()));
        let events = Arc::new(EventManager::new(&store, resolver));
        build_router(store, tasks, events, config, ContextRegistry::new()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn e4_http_round_trip_runs_a_task_with_bearer_auth() {
        let router = harness(ExposureConfig::new().with_token("T"));
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/__runner/task/t.sum")
            .header("content-type", "application/json")
            .header("x-runner-token", "T")
            .body(Body::from(serde_json::json!({ "input": { "a": 2, "b": 5 } }).to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "ok": true, "result": 7 }));
    }

    #[tokio::test]
    async fn missing_bearer_token_is_401() {
        let router = harness(ExposureConfig::new().with_token("T"));
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/__runner/task/t.sum")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "input": {} }).to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_post_method_is_405() {
        let router = harness(ExposureConfig::new().with_allow_anonymous(true));
        let request = HttpRequest::builder()
            .method("GET")
            .uri("/__runner/task/t.sum")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn path_outside_base_is_404() {
        let router = harness(ExposureConfig::new().with_allow_anonymous(true));
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/somewhere/else")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_task_is_404_without_open_exposure_or_a_tunnel() {
        let router = harness(ExposureConfig::new().with_allow_anonymous(true));
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/__runner/task/t.nope")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "input": {} }).to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        // No server-mode tunnel is registered and open exposure wasn't
        // requested via `dangerouslyAllowOpenExposure`, so even a real but
        // unlisted id is forbidden rather than merely "not found".
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn dangerously_allow_open_exposure_admits_any_registered_task() {
        let router = harness(
            ExposureConfig::new()
                .with_allow_anonymous(true)
                .with_dangerously_allow_open_exposure(true),
        );
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/__runner/task/t.sum")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "input": { "a": 10, "b": 1 } }).to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "ok": true, "result": 11 }));
    }

    #[tokio::test]
    async fn e5_multipart_upload_hydrates_input_file_from_manifest_and_part() {
        let router = harness(
            ExposureConfig::new()
                .with_allow_anonymous(true)
                .with_dangerously_allow_open_exposure(true),
        );
        let boundary = "B";
        let manifest = serde_json::json!({
            "input": { "file": { "$runnerFile": "File", "id": "F1", "meta": { "name": "override.txt", "type": "text/plain" } } }
        });
        let mut body = String::new();
        body.push_str(&format!("--{boundary}\r\n"));
        body.push_str("Content-Disposition: form-data; name=\"__manifest\"\r\n\r\n");
        body.push_str(&manifest.to_string());
        body.push_str("\r\n");
        body.push_str(&format!("--{boundary}\r\n"));
        body.push_str("Content-Disposition: form-data; name=\"file:F1\"; filename=\"original.bin\"\r\n");
        body.push_str("Content-Type: application/octet-stream\r\n\r\n");
        body.push_str("abc");
        body.push_str("\r\n");
        body.push_str(&format!("--{boundary}--\r\n"));

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/__runner/task/t.echoFile")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Manifest metadata (`override.txt`, `text/plain`) takes precedence
        // over the multipart-derived name/type (`original.bin`, octet-stream).
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "ok": true, "result": { "name": "override.txt", "type": "text/plain" } })
        );
    }

    #[tokio::test]
    async fn options_preflight_returns_204_with_cors_headers() {
        let router = harness(ExposureConfig::new().with_allow_anonymous(true).with_cors(
            CorsConfig {
                origin: CorsOrigin::One("https://example.com".to_string()),
                ..CorsConfig::default()
            },
        ));
        let request = HttpRequest::builder()
            .method("OPTIONS")
            .uri("/__runner/task/t.sum")
            .header("origin", "https://example.com")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "https://example.com"
        );
        assert_eq!(response.headers().get("vary").unwrap(), "Origin");
    }

    #[tokio::test]
    async fn build_router_fails_without_any_auth_configured() {
        let root = Arc::new(Resource::new("root", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) })));
        let store = Arc::new(Store::build(root, Value::Null).unwrap());
        store.finalize().unwrap();
        let resolver = Arc::new(NullResolver);
        let tasks = Arc::new(TaskRunner::new(Arc::clone(&store), resolver.clone()));
        let events = Arc::new(EventManager::new(&store, resolver));
        let result = build_router(store, tasks, events, ExposureConfig::new(), ContextRegistry::new());
        assert!(matches!(result, Err(KilnError::ExposureMissingToken)));
    }

    #[tokio::test]
    async fn streaming_result_is_piped_back_as_a_raw_body_instead_of_a_json_envelope() {
        let router = harness(ExposureConfig::new().with_allow_anonymous(true));
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/__runner/task/t.stream")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "input": {} }).to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"raw bytes");
    }

    /// Per the `CancelGuard` doc comment on `dispatch`: a client disconnect
    /// is observed in axum/hyper as the per-request future being dropped
    /// rather than polled to completion. `tokio::time::timeout` dropping the
    /// router's response future mid-flight stands in for that here.
    #[tokio::test]
    async fn dropping_the_in_flight_response_future_cancels_the_running_task() {
        let cancelled = Arc::new(tokio::sync::Notify::new());
        let cancelled_in_task = Arc::clone(&cancelled);
        let slow = Arc::new(Task::new("t.slow", move |_input, _deps| {
            let cancelled = Arc::clone(&cancelled_in_task);
            Box::pin(async move {
                let signal = kiln_task::cancellation_signal().r#use()?;
                tokio::select! {
                    biased;
                    () = signal.cancelled() => {
                        cancelled.notify_one();
                        Err(KilnError::Cancellation)
                    }
                    () = tokio::time::sleep(std::time::Duration::from_secs(5)) => Ok(Value::Null),
                }
            })
        }));
        let root = Arc::new(
            Resource::new("root", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) }))
                .with_register(vec![Item::Task(slow)]),
        );
        let store = Arc::new(Store::build(root, Value::Null).unwrap());
        store.finalize().unwrap();
        let resolver = Arc::new(NullResolver);
        let tasks = Arc::new(TaskRunner::new(Arc::clone(&store), resolver.clone()));
        let events = Arc::new(EventManager::new(&store, resolver));
        let router = build_router(
            store,
            tasks,
            events,
            ExposureConfig::new().with_allow_anonymous(true),
            ContextRegistry::new(),
        )
        .unwrap();

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/__runner/task/t.slow")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({ "input": {} }).to_string()))
            .unwrap();

        let _ = tokio::time::timeout(std::time::Duration::from_millis(50), router.oneshot(request)).await;

        tokio::time::timeout(std::time::Duration::from_secs(1), cancelled.notified())
            .await
            .expect("dropping the response future should cancel the in-flight task");
    }
}
