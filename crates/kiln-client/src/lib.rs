//! # Kiln Client
//!
//! The caller's side of the tunnel protocol: a
//! [`smart::SmartClient`] that mirrors the exposure server's transport
//! selection (plain JSON, multipart for local files, octet-stream for raw
//! bodies), a [`mixed::MixedClient`] composing that over a `forceSmart`
//! heuristic, [`registry::ErrorRegistry`] for typed-error re-throw, and
//! [`file::OutgoingFile`] for attaching local files to a task call.

pub mod config;
pub mod error;
pub mod file;
pub mod mixed;
pub mod registry;
pub mod smart;

pub use config::ClientConfig;
pub use error::ClientError;
pub use file::OutgoingFile;
pub use mixed::{ForceSmart, MixedClient, MixedInput, MixedResponse};
pub use registry::ErrorRegistry;
pub use smart::{SmartClient, TaskResponse};

/// Common prelude.
pub mod prelude {
    pub use crate::{
        ClientConfig, ClientError, ForceSmart, MixedClient, MixedInput, MixedResponse, OutgoingFile,
        SmartClient, TaskResponse,
    };
    pub use crate::registry::ErrorRegistry;
}
