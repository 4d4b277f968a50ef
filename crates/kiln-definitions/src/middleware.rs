//! [`Middleware`] — an interceptor around task invocation or resource
//! initialization. Task- and resource-flavored middleware share the
//! same host struct because attachments, dedup-by-id, and
//! config are identical between the two; only the `run` signature differs.

use std::sync::Arc;

use kiln_core::Id;
use kiln_error::KilnError;
use serde_json::Value;

use crate::dependencies::{BoxFuture, DepSpec, DepValue, Deps, DynValue};
use crate::schema::Schema;

/// Which invocation kind a [`Middleware`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareKind {
    /// Wraps a task's `run`.
    Task,
    /// Wraps a resource's `init`.
    Resource,
}

/// The `next` continuation handed to a task middleware. Calling it with
/// `Some(input)` overrides the input seen by downstream stages; `None` forwards the current input unchanged.
pub type TaskNext = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, KilnError>> + Send + Sync>;

/// The context a task middleware's `run` receives.
#[derive(Clone)]
pub struct TaskMiddlewareContext {
    /// The task being invoked.
    pub task_id: Id,
    /// The current input (possibly already rewritten by an outer middleware).
    pub input: Value,
    /// The continuation calling the next stage (or the task body itself).
    pub next: TaskNext,
}

/// A task middleware's `run` body.
pub type TaskMiddlewareRunFn =
    Arc<dyn Fn(TaskMiddlewareContext, Deps) -> BoxFuture<'static, Result<Value, KilnError>> + Send + Sync>;

/// The `next` continuation handed to a resource middleware: calls the next
/// stage (or the resource's own `init`) with no arguments, since resource
/// init doesn't support input rewriting the way task middleware does.
pub type ResourceNext = Arc<dyn Fn() -> BoxFuture<'static, Result<DynValue, KilnError>> + Send + Sync>;

/// The context a resource middleware's `run` receives.
#[derive(Clone)]
pub struct ResourceMiddlewareContext {
    /// The resource being initialized.
    pub resource_id: Id,
    /// The resource's config.
    pub config: Value,
    /// The continuation calling the next stage (or `init` itself).
    pub next: ResourceNext,
}

/// A resource middleware's `run` body.
pub type ResourceMiddlewareRunFn = Arc<
dyn Fn(ResourceMiddlewareContext, Deps) -> BoxFuture<'static, Result<DynValue, KilnError>> + Send + Sync,
>;

/// The kind-specific `run` body, erased behind [`MiddlewareKind`].
#[derive(Clone)]
pub enum MiddlewareRun {
    /// A task middleware body.
    Task(TaskMiddlewareRunFn),
    /// A resource middleware body.
    Resource(ResourceMiddlewareRunFn),
}

/// An interceptor wrapping task invocation or resource initialization.
#[derive(Clone)]
pub struct Middleware {
    /// Unique id.
    pub id: Id,
    /// Which invocation kind this wraps.
    pub kind: MiddlewareKind,
    /// Config validation schema for attachments' `config` payload.
    pub config_schema: Option<Schema>,
    /// Declared dependencies.
    pub dependencies: Option<DepSpec>,
    /// Whether this middleware runs for every unit of its `kind`,
    /// regardless of attachment or tags.
    pub global: bool,
    /// Tag ids this middleware runs for: any unit carrying one of these
    /// tags gets it composed in, even without a direct attachment.
    pub tags: Vec<Id>,
    /// The body.
    pub run: MiddlewareRun,
}

impl Middleware {
    /// Declares a task middleware.
    pub fn task(
        id: impl Into<Id>,
        run: impl Fn(TaskMiddlewareContext, Deps) -> BoxFuture<'static, Result<Value, KilnError>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            kind: MiddlewareKind::Task,
            config_schema: None,
            dependencies: None,
            global: false,
            tags: Vec::new(),
            run: MiddlewareRun::Task(Arc::new(run)),
        }
    }

    /// Declares a resource middleware.
    pub fn resource(
        id: impl Into<Id>,
        run: impl Fn(ResourceMiddlewareContext, Deps) -> BoxFuture<'static, Result<DynValue, KilnError>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            kind: MiddlewareKind::Resource,
            config_schema: None,
            dependencies: None,
            global: false,
            tags: Vec::new(),
            run: MiddlewareRun::Resource(Arc::new(run)),
        }
    }

    /// Attaches a config schema.
    #[must_use]
    pub fn with_config_schema(mut self, schema: Schema) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// Attaches dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: DepSpec) -> Self {
        self.dependencies = Some(deps);
        self
    }

    /// Marks this middleware as running for every unit of its `kind`.
    #[must_use]
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    /// Marks this middleware as running for any unit carrying one of
    /// `tags`, even without a direct attachment.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<Id>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Produces a bare attachment carrying no config.
    #[must_use]
    pub fn attach(self: &Arc<Self>) -> MiddlewareAttachment {
        MiddlewareAttachment {
            middleware: Arc::clone(self),
            config: None,
        }
    }

    /// Produces an attachment carrying config.
    #[must_use]
    pub fn with(self: &Arc<Self>, config: impl Into<Value>) -> MiddlewareAttachment {
        MiddlewareAttachment {
            middleware: Arc::clone(self),
            config: Some(config.into()),
        }
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A middleware bound to a host (task, resource, or the global
/// attachment lists), optionally carrying a config payload.
#[derive(Clone)]
pub struct MiddlewareAttachment {
    /// The attached middleware.
    pub middleware: Arc<Middleware>,
    /// The config payload passed at attachment time, if any.
    pub config: Option<Value>,
}

impl MiddlewareAttachment {
    /// The id of the attached middleware, used for dedup-by-id composition.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.middleware.id
    }
}

/// Builds the full composed chain for one consumer: every global
/// middleware in `pool`, then every tag-matched one (in `pool`'s order),
/// then `attached` (the consumer's own attachments) — deduplicated by id,
/// keeping the first occurrence.
#[must_use]
pub fn compose_chain(
    pool: impl IntoIterator<Item = Arc<Middleware>>,
    consumer_tags: &[Id],
    attached: Vec<MiddlewareAttachment>,
) -> Vec<MiddlewareAttachment> {
    let pool: Vec<Arc<Middleware>> = pool.into_iter().collect();
    let mut chain: Vec<MiddlewareAttachment> = pool.iter().filter(|m| m.global).map(Middleware::attach).collect();
    chain.extend(
        pool.iter()
            .filter(|m| !m.global && m.tags.iter().any(|t| consumer_tags.contains(t)))
            .map(Middleware::attach),
    );
    chain.extend(attached);
    dedup_by_first_occurrence(chain)
}

/// Deduplicates a sequence of attachments by middleware id, keeping the
/// first occurrence.
#[must_use]
pub fn dedup_by_first_occurrence(attachments: Vec<MiddlewareAttachment>) -> Vec<MiddlewareAttachment> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        if seen.insert(attachment.id().clone()) {
            out.push(attachment);
        }
    }
    out
}

/// Wraps a resolved dependency map into a `DepValue::Resource` map for a
/// middleware-only deps record; kept here (rather than in `dependencies.rs`)
/// since only middleware composition needs to build a `Deps` record out of
/// thin air for a no-dependency attachment.
#[must_use]
pub fn no_deps() -> Deps {
    Deps::new(indexmap::IndexMap::<String, DepValue>::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence() {
        let m = Arc::new(Middleware::task("auth", |ctx, _deps| {
            Box::pin(async move { (ctx.next)(None).await })
        }));
        let attachments = vec![m.attach(), m.with(serde_json::json!({"x": 1})), m.attach()];
        let deduped = dedup_by_first_occurrence(attachments);
        assert_eq!(deduped.len(), 1);
        assert!(deduped[0].config.is_none());
    }

    #[test]
    fn chain_orders_global_then_tag_then_attached() {
        let logging = Arc::new(
            Middleware::task("logging", |ctx, _deps| Box::pin(async move { (ctx.next)(None).await })).global(),
        );
        let auth = Arc::new(
            Middleware::task("auth", |ctx, _deps| Box::pin(async move { (ctx.next)(None).await }))
                .with_tags(["secured"]),
        );
        let rate_limit = Arc::new(Middleware::task("rateLimit", |ctx, _deps| {
            Box::pin(async move { (ctx.next)(None).await })
        }));

        let pool = vec![Arc::clone(&auth), Arc::clone(&logging)];
        let attached = vec![rate_limit.attach()];
        let chain = compose_chain(pool, &[Id::new("secured")], attached);

        let ids: Vec<&str> = chain.iter().map(|a| a.id().as_str()).collect();
        assert_eq!(ids, vec!["logging", "auth", "rateLimit"]);
    }
}
