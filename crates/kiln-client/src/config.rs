//! Client-side configuration: the base URL/token/headers a
//! [`crate::smart::SmartClient`] needs to mirror the exposure server it
//! talks to, and the request timeout that becomes a `REQUEST_TIMEOUT`
//! client error.

use std::time::Duration;

use kiln_tunnel::{DEFAULT_AUTH_HEADER, DEFAULT_BASE_PATH};

/// The default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration shared by every request a [`crate::smart::SmartClient`]
/// sends. Immutable once built.
#[derive(Clone)]
pub struct ClientConfig {
    /// The exposure server's origin, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Route prefix the server mounted its routes under.
    pub base_path: String,
    /// Header carrying the bearer token.
    pub auth_header: String,
    /// The bearer token to send, if the server requires one.
    pub token: Option<String>,
    /// Per-request timeout; exceeding it surfaces as `REQUEST_TIMEOUT`/408.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Starts from `base_url` with every other field at its default.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the route prefix.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Overrides the auth header name.
    #[must_use]
    pub fn with_auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = header.into();
        self
    }

    /// Overrides the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The task route for `id`.
    #[must_use]
    pub fn task_url(&self, id: &kiln_core::Id) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), kiln_tunnel::path::task_path(&self.base_path, id))
    }

    /// The event route for `id`.
    #[must_use]
    pub fn event_url(&self, id: &kiln_core::Id) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), kiln_tunnel::path::event_path(&self.base_path, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Id;

    #[test]
    fn builds_task_url_from_base_and_path() {
        let config = ClientConfig::new("https://api.example.com").with_base_path("/rpc");
        let url = config.task_url(&Id::new("users.create"));
        assert_eq!(url, "https://api.example.com/rpc/task/users.create");
    }
}
