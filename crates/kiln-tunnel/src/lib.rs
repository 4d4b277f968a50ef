//! # Kiln Tunnel
//!
//! The wire-level pieces shared between `kiln-exposure` (axum server) and
//! `kiln-client` (reqwest client) — neither depends on the other, both
//! depend on this:
//!
//! - [`envelope::ProtocolEnvelope`] / [`envelope::assert_ok_envelope`] — the
//! response shape and its unwrap-or-throw helper.
//! - [`path`] — the `{basePath}/task|event/{id}` route scheme, shared header
//! names, and content-type constants.
//! - [`request`] — the plain-JSON request/response body DTOs.
//! - [`manifest`] — multipart [`kiln_serializer::FileSentinel`] discovery and
//! substitution over a manifest tree.
//! - [`routes`] — the [`routes::TunnelRoutes`] allow-list contract a tunnel
//! resource publishes.
//! - [`streaming`] — the [`streaming::StreamingResult`] sentinel marking a
//! task result that should be piped back as a raw body instead of a JSON
//! envelope.

pub mod envelope;
pub mod manifest;
pub mod path;
pub mod request;
pub mod routes;
pub mod streaming;

pub use envelope::{assert_ok_envelope, assert_task_routed, ProtocolEnvelope, ProtocolErrorBody};
pub use path::{RouteKind, CONTEXT_HEADER, DEFAULT_AUTH_HEADER, DEFAULT_BASE_PATH, MANIFEST_PART_NAME};
pub use request::{EventRequestBody, EventResultBody, TaskRequestBody};
pub use routes::{TunnelMode, TunnelRoutes};
pub use streaming::{as_streaming_result, StreamingResult};

/// Common prelude.
pub mod prelude {
    pub use crate::{
        assert_ok_envelope, assert_task_routed, as_streaming_result, EventRequestBody, EventResultBody,
        ProtocolEnvelope, ProtocolErrorBody, RouteKind, StreamingResult, TaskRequestBody, TunnelMode, TunnelRoutes,
        CONTEXT_HEADER, DEFAULT_AUTH_HEADER, DEFAULT_BASE_PATH, MANIFEST_PART_NAME,
    };
}
