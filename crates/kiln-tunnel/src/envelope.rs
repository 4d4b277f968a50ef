//! The wire envelope every tunnel response carries.
//!
//! `ProtocolEnvelope<T> = { ok: true, result: T } | { ok: false, error:
//! {...} }` reads naturally as a Rust enum, but an externally-tagged enum
//! has no way to key its variant off a JSON *boolean* field rather than a
//! string discriminant — so this is a flat struct with an `ok` flag and two
//! `Option` fields instead, which serializes to exactly the same two wire
//! shapes an ok/error envelope needs (`serde`'s `skip_serializing_if` hides
//! whichever field doesn't apply).

use kiln_core::Id;
use kiln_error::kinds::TunnelErrorCode;
use kiln_error::KilnError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The envelope wrapping every tunnel response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEnvelope<T> {
    /// Discriminates which of `result`/`error` is populated.
    pub ok: bool,
    /// Present when `ok` is `true`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<T>,
    /// Present when `ok` is `false`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ProtocolErrorBody>,
}

/// The `error` field of a failed [`ProtocolEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolErrorBody {
    /// One of [`TunnelErrorCode`]'s wire strings.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// A registered error helper id, when this wraps a typed domain error.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    /// The typed error's data payload, when `id` is set.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

impl<T> ProtocolEnvelope<T> {
    /// Builds a success envelope.
    pub fn ok(result: T) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Builds a failure envelope from a [`KilnError`], extracting the
    /// tunnel-specific fields when the error already carries them and
    /// falling back to [`TunnelErrorCode::InternalError`] otherwise.
    #[must_use]
    pub fn err(error: &KilnError) -> Self {
        let body = match error {
            KilnError::Tunnel {
                code, message, id, data,..
            } => ProtocolErrorBody {
                code: code.as_str().to_string(),
                message: message.clone(),
                id: id.clone(),
                data: data.clone(),
            },
            other => ProtocolErrorBody {
                code: TunnelErrorCode::InternalError.as_str().to_string(),
                message: other.to_string(),
                id: None,
                data: None,
            },
        };
        Self {
            ok: false,
            result: None,
            error: Some(body),
        }
    }
}

/// Unwraps an envelope into its result, or fails with the [`KilnError::Tunnel`]
/// an `assertOkEnvelope`-style check would raise.
///
/// `http_code`, when given, is attached to the reconstructed error —
/// envelopes carry no transport-status field of their own, since that's a
/// property of the HTTP response wrapping them, not of the body.
///
/// # Errors
/// Returns [`KilnError::Tunnel`] built from the envelope's `error` field
/// when `ok` is `false`. Returns [`KilnError::Tunnel`] with
/// [`TunnelErrorCode::InvalidResponse`] if `ok` is `true` but `result` is
/// missing (a malformed peer).
pub fn assert_ok_envelope<T>(envelope: ProtocolEnvelope<T>, http_code: Option<u16>) -> Result<T, KilnError> {
    if envelope.ok {
        envelope.result.ok_or_else(|| KilnError::Tunnel {
            code: TunnelErrorCode::InvalidResponse,
            message: "envelope reported ok but carried no result".to_string(),
            http_code,
            id: None,
            data: None,
        })
    } else {
        let body = envelope.error.unwrap_or(ProtocolErrorBody {
            code: TunnelErrorCode::InvalidResponse.as_str().to_string(),
            message: "envelope reported failure but carried no error body".to_string(),
            id: None,
            data: None,
        });
        Err(KilnError::Tunnel {
            code: TunnelErrorCode::from_str_lenient(&body.code),
            message: body.message,
            http_code,
            id: body.id,
            data: body.data,
        })
    }
}

/// Asserts that a task id appears in a routed set, the sentinel helper
/// names `assertTaskRouted` for phantom-task consumers.
///
/// # Errors
/// Returns [`KilnError::PhantomTaskNotRouted`] if `routed_ids` doesn't
/// contain `task_id`.
pub fn assert_task_routed(routed_ids: &[Id], task_id: &Id) -> Result<(), KilnError> {
    if routed_ids.contains(task_id) {
        Ok(())
    } else {
        Err(KilnError::PhantomTaskNotRouted {
            task_id: task_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ok_envelope_round_trips() {
        let envelope = ProtocolEnvelope::ok(serde_json::json!({"n": 42}));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "result": {"n": 42}}));
        let result = assert_ok_envelope(envelope, None).unwrap();
        assert_eq!(result, serde_json::json!({"n": 42}));
    }

    #[test]
    fn err_envelope_becomes_tunnel_error() {
        let source = KilnError::Tunnel {
            code: TunnelErrorCode::NotFound,
            message: "no such task".to_string(),
            http_code: None,
            id: None,
            data: None,
        };
        let envelope: ProtocolEnvelope<Value> = ProtocolEnvelope::err(&source);
        let err = assert_ok_envelope(envelope, Some(404)).unwrap_err();
        match err {
            KilnError::Tunnel { code, http_code, .. } => {
                assert_eq!(code, TunnelErrorCode::NotFound);
                assert_eq!(http_code, Some(404));
            }
            _ => panic!("expected Tunnel error"),
        }
    }

    #[test]
    fn non_tunnel_error_falls_back_to_internal_error() {
        let source = KilnError::ResourceNotFound { id: "db".to_string() };
        let envelope: ProtocolEnvelope<Value> = ProtocolEnvelope::err(&source);
        assert_eq!(envelope.error.unwrap().code, "INTERNAL_ERROR");
    }
}
