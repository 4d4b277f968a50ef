//! The error a [`crate::smart::SmartClient`] call fails with.

use std::fmt;

use kiln_error::helper::AnyTypedError;
use kiln_error::KilnError;

use crate::registry::ErrorRegistry;

/// Either the original typed error a remote task raised (when its
/// `errorRegistry` entry matched), or a generic tunnel-level failure.
pub enum ClientError {
    /// The server's `{ id, data }` matched a registered [`kiln_error::ErrorHelper`];
    /// this is the reconstructed, strongly-typed error.
    Typed(Box<dyn AnyTypedError>),
    /// Every other failure: unauthorized, not found, invalid envelope,
    /// request timeout, or an unrecognized typed error.
    Tunnel(KilnError),
}

impl ClientError {
    /// Builds from a transport/tunnel-level failure, reconstructing a typed
    /// error from `registry` when the failure carries a recognized id.
    #[must_use]
    pub fn from_tunnel(err: KilnError, registry: &ErrorRegistry) -> Self {
        if let KilnError::Tunnel { id: Some(id), data, .. } = &err {
            if let Some(typed) = registry.reconstruct(id, data.clone().unwrap_or(serde_json::Value::Null)) {
                return Self::Typed(typed);
            }
        }
        Self::Tunnel(err)
    }
}

impl fmt::Debug for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typed(err) => fmt::Debug::fmt(err, f),
            Self::Tunnel(err) => fmt::Debug::fmt(err, f),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typed(err) => fmt::Display::fmt(err, f),
            Self::Tunnel(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Typed(err) => Some(err.as_ref()),
            Self::Tunnel(err) => Some(err),
        }
    }
}

impl From<KilnError> for ClientError {
    /// Wraps a bare [`KilnError`] with no registry lookup — used for
    /// failures that never reached the wire (connection errors, timeouts).
    fn from(err: KilnError) -> Self {
        Self::Tunnel(err)
    }
}
