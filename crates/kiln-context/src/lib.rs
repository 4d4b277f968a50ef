//! # Kiln Context
//!
//! Per-logical-invocation value propagation. An [`AsyncContext<T>`]
//! binds a typed value for the lifetime of an async call tree without
//! threading it through every function signature. It is built on the
//! platform's async-local-storage primitive — here, `tokio::task_local!` — so
//! propagation follows `.await` points the same way tokio's own
//! instrumentation does, rather than relying on any bespoke thread-local
//! that would desync across an executor's work-stealing.
//!
//! A single task-local slot backs every [`AsyncContext`]: it holds an
//! immutable snapshot (`Arc<HashMap<Id, AnyValue>>`) of every context
//! currently bound. [`AsyncContext::provide`] clones that snapshot, applies
//! one override, and re-enters task-local scope for the duration of the
//! provided future — nested `provide` calls shadow correctly because each
//! is its own task-local scope, restored automatically when its future
//! resolves.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use kiln_core::Id;
use kiln_error::KilnError;
use serde::Serialize;
use serde::de::DeserializeOwned;

type AnyValue = Arc<dyn Any + Send + Sync>;
type Snapshot = Arc<HashMap<Id, AnyValue>>;

tokio::task_local! {
    static CONTEXT_SNAPSHOT: Snapshot;
}

/// A typed, per-invocation propagated value.
#[derive(Clone)]
pub struct AsyncContext<T> {
    id: Id,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> AsyncContext<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Declares a new async context under `id`. Mirrors `createContext(id)`.
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            _marker: std::marker::PhantomData,
        }
    }

    /// The context's id, used as the key in the `x-runner-context` header map.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Runs `fut` with `value` bound for its entire execution, including any
    /// further nested `provide` calls it makes.
    pub async fn provide<Fut: Future>(&self, value: T, fut: Fut) -> Fut::Output {
        let mut next: HashMap<Id, AnyValue> = CONTEXT_SNAPSHOT
            .try_with(|snapshot| (**snapshot).clone())
            .unwrap_or_default();
        next.insert(self.id.clone(), Arc::new(value) as AnyValue);
        CONTEXT_SNAPSHOT.scope(Arc::new(next), fut).await
    }

    /// Returns the innermost bound value, or `None` if this context has not
    /// been `provide`d anywhere on the current call path.
    #[must_use]
    pub fn try_use(&self) -> Option<T> {
        CONTEXT_SNAPSHOT
            .try_with(|snapshot| {
                snapshot
                    .get(&self.id)
                    .and_then(|v| v.downcast_ref::<T>())
                    .cloned()
            })
            .unwrap_or(None)
    }

    /// Returns the innermost bound value.
    ///
    /// # Errors
    /// Returns [`KilnError::PlatformUnsupportedFunction`] when called outside
    /// any task-local scope at all (the plain-browser analogue: no
    /// async-local-storage primitive is available) or when this context was
    /// never `provide`d on the current path.
    pub fn r#use(&self) -> Result<T, KilnError> {
        self.try_use()
            .ok_or_else(|| KilnError::PlatformUnsupportedFunction {
                function: format!("async context \"{}\" is not bound on this path", self.id),
            })
    }
}

// Serialization only matters for contexts that actually cross the wire (the
// `x-runner-context` header) — a plain in-process signal like a cancellation
// token never needs it, so it isn't forced on every `AsyncContext<T>` above.
impl<T> AsyncContext<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Serializes the currently-bound value for the `x-runner-context` header,
    /// if bound.
    ///
    /// # Errors
    /// Returns [`KilnError::HttpContextSerialization`] if the value fails to
    /// serialize to JSON.
    pub fn serialize_current(&self) -> Result<Option<serde_json::Value>, KilnError> {
        match self.try_use() {
            Some(value) => serde_json::to_value(&value)
                .map(Some)
                .map_err(|e| KilnError::HttpContextSerialization {
                    context_id: self.id.to_string(),
                    cause: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nested_provide_shadows_and_restores() {
        let ctx: AsyncContext<u32> = AsyncContext::new("tenant");

        ctx.provide(1, async {
            assert_eq!(ctx.try_use(), Some(1));
            ctx.provide(2, async {
                assert_eq!(ctx.try_use(), Some(2));
            })
                .await;
            assert_eq!(ctx.try_use(), Some(1));
        })
            .await;
    }

    #[tokio::test]
    async fn unset_context_is_none() {
        let ctx: AsyncContext<u32> = AsyncContext::new("absent");
        assert_eq!(ctx.try_use(), None);
        assert!(ctx.r#use().is_err());
    }
}
