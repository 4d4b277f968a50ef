//! Error-to-HTTP-status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kiln_error::KilnError;
use kiln_error::kinds::TunnelErrorCode;
use kiln_tunnel::{ProtocolEnvelope, ProtocolErrorBody};
use serde_json::Value;

/// An error ready to be written as an HTTP response: the envelope body plus
/// the status line it's carried on.
pub struct ExposureError {
    code: TunnelErrorCode,
    message: String,
    status: StatusCode,
    id: Option<String>,
    data: Option<Value>,
}

impl ExposureError {
    fn new(code: TunnelErrorCode, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status,
            id: None,
            data: None,
        }
    }

    pub fn method_not_allowed() -> Self {
        Self::new(TunnelErrorCode::MethodNotAllowed, StatusCode::METHOD_NOT_ALLOWED, "only POST is accepted")
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorCode::Unauthorized, StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorCode::NotFound, StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorCode::Forbidden, StatusCode::FORBIDDEN, message)
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorCode::InvalidJson, StatusCode::BAD_REQUEST, message)
    }

    pub fn invalid_multipart(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorCode::InvalidMultipart, StatusCode::BAD_REQUEST, message)
    }

    pub fn missing_manifest() -> Self {
        Self::new(
            TunnelErrorCode::MissingManifest,
            StatusCode::INTERNAL_SERVER_ERROR,
            "multipart body is missing its __manifest part",
        )
    }

    pub fn missing_file_part(id: &str) -> Self {
        Self::new(
            TunnelErrorCode::MissingFilePart,
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("manifest references file sentinel \"{id}\" with no matching file:{id} part"),
        )
    }

    pub fn aborted() -> Self {
        Self::new(
            TunnelErrorCode::RequestAborted,
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "client disconnected before a response could be sent",
        )
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorCode::InternalError, StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<KilnError> for ExposureError {
    fn from(err: KilnError) -> Self {
        match &err {
            KilnError::Cancellation => Self::aborted(),
            KilnError::TaskNotFound { id } | KilnError::EventNotFound { id } => {
                Self::not_found(format!("\"{id}\" is not registered"))
            }
            KilnError::Tunnel {
                code,
                message,
                http_code,
                id,
                data,
            } => Self {
                code: *code,
                message: message.clone(),
                status: http_code
                    .and_then(|c| StatusCode::from_u16(c).ok())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                id: id.clone(),
                data: data.clone(),
            },
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ExposureError {
    fn into_response(self) -> Response {
        let envelope: ProtocolEnvelope<Value> = ProtocolEnvelope {
            ok: false,
            result: None,
            error: Some(ProtocolErrorBody {
                code: self.code.as_str().to_string(),
                message: self.message,
                id: self.id,
                data: self.data,
            }),
        };
        (self.status, Json(envelope)).into_response()
    }
}
