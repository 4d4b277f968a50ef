//! # Kiln Error
//!
//! Two things live here:
//!
//! - [`KilnError`] — the closed taxonomy of errors the runtime itself raises
//! (registration conflicts, cycle detection, visibility violations,
//! validation failures, concurrency primitives, tunnel/HTTP). Every variant
//! carries a `remediation()` string meant to be shown to the developer, not
//! just the end user.
//! - [`ErrorHelper`] — the `defineError` unit kind user code registers for its
//! own domain errors: a `format`/`remediation`/`is`/`throw` quad over a
//! typed payload.
//!
//! Keeping these in one crate (rather than splitting framework errors from
//! the user-facing helper type) mirrors how the corpus this runtime is
//! grounded on keeps its error kinds and its `NebulaError` facade together:
//! callers reach for one crate for anything error-shaped.

pub mod helper;
pub mod kinds;

pub use helper::{ErrorHelper, ErrorHelperError};
pub use kinds::KilnError;

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, KilnError>;

/// Common prelude.
pub mod prelude {
    pub use crate::{ErrorHelper, ErrorHelperError, KilnError, Result};
}
