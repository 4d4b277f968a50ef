//! Per-request async-context plumbing: hydrating the `x-runner-context`
//! header and publishing resolved
//! multipart files to task code (see [`crate::file`]).

use std::collections::HashMap;
use std::sync::Arc;

use kiln_context::AsyncContext;
use kiln_definitions::dependencies::BoxFuture;
use kiln_error::KilnError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::file::InputFile;

/// The resolved multipart files for the in-flight request, keyed by
/// sentinel id. Bound for the duration of task execution so a task body can
/// look up the descriptor the manifest substitution left behind.
#[must_use]
pub fn exposure_files() -> AsyncContext<Arc<HashMap<String, InputFile>>> {
    AsyncContext::new("kiln.exposure.files")
}

/// A type-erased `(header value, inner future) -> inner future` wrapper that
/// binds one async context if the header value deserializes to its type,
/// and is a no-op otherwise.
pub type ContextHydrator =
    Arc<dyn Fn(Value, BoxFuture<'static, Result<Value, KilnError>>) -> BoxFuture<'static, Result<Value, KilnError>> + Send + Sync>;

/// Builds a [`ContextHydrator`] for `ctx`, so a registry of heterogeneous
/// contexts can be folded over a header map uniformly.
pub fn hydrator_for<T>(ctx: AsyncContext<T>) -> ContextHydrator
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    Arc::new(move |value: Value, inner: BoxFuture<'static, Result<Value, KilnError>>| {
        let ctx = ctx.clone();
        Box::pin(async move {
            match serde_json::from_value::<T>(value) {
                Ok(bound) => ctx.provide(bound, inner).await,
                Err(_) => inner.await,
            }
        })
    })
}

/// A registry of known async contexts, keyed by the id used in the
/// `x-runner-context` header's `{ asyncContextId -> value }` map.
#[derive(Clone, Default)]
pub struct ContextRegistry {
    hydrators: std::collections::HashMap<String, ContextHydrator>,
}

impl ContextRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context under `id`.
    #[must_use]
    pub fn with_context<T>(mut self, id: impl Into<String>, ctx: AsyncContext<T>) -> Self
    where
        T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    {
        self.hydrators.insert(id.into(), hydrator_for(ctx));
        self
    }

    /// Wraps `inner` with every context named in `header_value` that this
    /// registry recognizes, ignoring unknown ids and deserialization
    /// failures.
    pub fn hydrate(
        &self,
        header_value: &Value,
        inner: BoxFuture<'static, Result<Value, KilnError>>,
    ) -> BoxFuture<'static, Result<Value, KilnError>> {
        let Some(map) = header_value.as_object() else {
            return inner;
        };
        map.iter().fold(inner, |acc, (id, value)| match self.hydrators.get(id) {
            Some(hydrator) => hydrator(value.clone(), acc),
            None => acc,
        })
    }
}
