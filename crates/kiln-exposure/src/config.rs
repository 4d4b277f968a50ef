//! Exposure server configuration.

use std::sync::Arc;
use std::time::Duration;

use kiln_tunnel::{DEFAULT_AUTH_HEADER, DEFAULT_BASE_PATH};

/// Which origins a CORS policy admits.
#[derive(Clone)]
pub enum CorsOrigin {
    /// `origin: "*"`.
    Any,
    /// `origin: string`.
    One(String),
    /// `origin: string[]`.
    Many(Vec<String>),
    /// `origin: (req) => allowed` — evaluated against the raw `Origin` header value.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Default for CorsOrigin {
    fn default() -> Self {
        Self::Any
    }
}

/// CORS policy for the exposed routes.
#[derive(Clone)]
pub struct CorsConfig {
    /// Allowed origins.
    pub origin: CorsOrigin,
    /// Allowed HTTP methods; the exposure routes are POST-only but preflight
    /// still needs to advertise it.
    pub methods: Vec<String>,
    /// Allowed request headers. `None` echoes whatever the browser asked for.
    pub allowed_headers: Option<Vec<String>>,
    /// Headers exposed to the browser beyond the CORS-safelisted set.
    pub exposed_headers: Vec<String>,
    /// Whether to allow credentialed requests.
    pub credentials: bool,
    /// How long a browser may cache a preflight response.
    pub max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: CorsOrigin::Any,
            methods: vec!["POST".to_string(), "OPTIONS".to_string()],
            allowed_headers: None,
            exposed_headers: Vec::new(),
            credentials: false,
            max_age: None,
        }
    }
}

/// Exposure server configuration. Immutable once built; `ExposureServer::new`
/// takes it by value.
#[derive(Clone)]
pub struct ExposureConfig {
    /// Route prefix; every task/event route is mounted under it.
    pub base_path: String,
    /// Header carrying the bearer token.
    pub auth_header: String,
    /// The expected bearer token. Required unless `allow_anonymous` or
    /// `dangerously_allow_open_exposure` is set.
    pub token: Option<String>,
    /// Skip authentication entirely.
    pub allow_anonymous: bool,
    /// Skip both authentication and the tunnel allow-list check. Named
    /// loudly on purpose — this exposes every registered task/event.
    pub dangerously_allow_open_exposure: bool,
    /// Whether to hydrate async contexts from the `x-runner-context` header.
    pub allow_async_context: bool,
    /// CORS policy.
    pub cors: CorsConfig,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            token: None,
            allow_anonymous: false,
            dangerously_allow_open_exposure: false,
            allow_async_context: true,
            cors: CorsConfig::default(),
        }
    }
}

impl ExposureConfig {
    /// Starts from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the route prefix.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Sets the bearer token and its header name (defaults to
    /// [`kiln_tunnel::DEFAULT_AUTH_HEADER`]).
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

    /// Allows requests through with no token at all.
    #[must_use]
    pub const fn with_allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    /// Bypasses both authentication and the tunnel allow-list.
    #[must_use]
    pub const fn with_dangerously_allow_open_exposure(mut self, allow: bool) -> Self {
        self.dangerously_allow_open_exposure = allow;
        self
    }

    /// Toggles `x-runner-context` hydration.
    #[must_use]
    pub const fn with_allow_async_context(mut self, allow: bool) -> Self {
        self.allow_async_context = allow;
        self
    }

    /// Replaces the CORS policy.
    #[must_use]
    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    /// Whether init should fail for want of any auth configuration.
    #[must_use]
    pub const fn requires_token(&self) -> bool {
        !self.allow_anonymous && !self.dangerously_allow_open_exposure && self.token.is_none()
    }
}
