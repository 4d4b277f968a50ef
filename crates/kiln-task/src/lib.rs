//! # Kiln Task
//!
//! Task invocation: phantom-task tunnel routing, input/result
//! schema validation, middleware chain composition shared with
//! `kiln-resource` via [`kiln_definitions::middleware::compose_chain`], and
//! cancellation threaded through the async context rather than a plain
//! function parameter.

use std::sync::Arc;

use kiln_context::AsyncContext;
use kiln_core::Id;
use kiln_definitions::dependencies::{BoxFuture, Deps, DynValue};
use kiln_definitions::middleware::{compose_chain, MiddlewareAttachment, MiddlewareRun, TaskMiddlewareContext, TaskNext};
use kiln_definitions::task::TaskRunFn;
use kiln_definitions::Task;
use kiln_error::KilnError;
use kiln_store::{DepsResolver, Store};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// The per-invocation cancellation signal a task body or middleware may
/// observe via `cancellation_signal().try_use()`: `options.signal` threaded
/// through the async context rather than passed as an explicit argument.
#[must_use]
pub fn cancellation_signal() -> AsyncContext<CancellationToken> {
    AsyncContext::new("kiln.taskRunner.cancellationSignal")
}

/// Options accepted by [`TaskRunner::run`].
#[derive(Clone, Default)]
pub struct RunOptions {
    /// An optional cancellation signal, bound into the async context for
    /// the duration of the call.
    pub signal: Option<CancellationToken>,
}

/// A resource whose initialized value can route a phantom task or event
///. Defined here — the consumer — rather
/// than in `kiln-tunnel`, the same "small capability interface accepted as
/// a trait object" shape `kiln-store::DepsResolver` uses, so `kiln-task`
/// never needs to depend on `kiln-tunnel`/`kiln-exposure`/`kiln-client`.
pub trait TunnelRouter: Send + Sync {
    /// Whether this tunnel routes the given task id.
    fn routes_task(&self, task_id: &Id) -> bool;

    /// Delegates a phantom task invocation to this tunnel.
    fn run_task(&self, task_id: &Id, input: Value) -> BoxFuture<'static, Result<Value, KilnError>>;
}

/// Drives task invocation for one `Store`.
pub struct TaskRunner {
    store: Arc<Store>,
    resolver: Arc<dyn DepsResolver>,
}

impl TaskRunner {
    /// Builds a runner over `store`, resolving dependency maps through
    /// `resolver`.
    #[must_use]
    pub fn new(store: Arc<Store>, resolver: Arc<dyn DepsResolver>) -> Self {
        Self { store, resolver }
    }

    /// Invokes `task_id` with `input`.
    ///
    /// # Errors
    /// - [`KilnError::TaskNotFound`] if `task_id` isn't registered.
    /// - [`KilnError::PhantomTaskNotRouted`] if the task is phantom and no
    /// registered tunnel routes it.
    /// - [`KilnError::Validation`] if the input or result fails its schema.
    /// - [`KilnError::Cancellation`] if `options.signal` fires before the
    /// task completes.
    /// - Whatever the task body, a middleware, or a routed tunnel itself
    /// returns.
    pub async fn run(&self, task_id: &Id, input: Value, options: RunOptions) -> Result<Value, KilnError> {
        let task = self.store.get_task(task_id)?;

        let work = self.run_inner(Arc::clone(&task), input);

        match options.signal.clone() {
            Some(signal) => {
                cancellation_signal()
                    .provide(signal.clone(), async move {
                        tokio::select! {
                            biased;
                            () = signal.cancelled() => Err(KilnError::Cancellation),
                            result = work => result,
                        }
                    })
                    .await
            }
            None => work.await,
        }
    }

    async fn run_inner(&self, task: Arc<Task>, input: Value) -> Result<Value, KilnError> {
        if task.phantom {
            return self.route_phantom(&task, input).await;
        }

        let input = match &task.input_schema {
            Some(schema) => schema.parse(&input).map_err(|cause| KilnError::Validation {
                subject: "Task input",
                unit_id: task.id.to_string(),
                cause,
            })?,
            None => input,
        };

        let deps = self.resolver.resolve(task.dependencies.as_ref(), &Value::Null)?;

        let pool: Vec<Arc<_>> = self.store.task_middleware.iter().map(|e| Arc::clone(e.value())).collect();
        let consumer_tags: Vec<Id> = self.store.visibility.tags_of(&task.id).into_iter().collect();
        let chain = compose_chain(pool, &consumer_tags, task.middleware.clone());

        let run_fn = task
            .run
            .clone()
            .expect("non-phantom task must carry a run body (Task::new always sets one)");

        let result = run_chain(chain, task.id.clone(), input, deps.clone(), run_fn).await?;

        match &task.result_schema {
            Some(schema) => schema.parse(&result).map_err(|cause| KilnError::Validation {
                subject: "Task result",
                unit_id: task.id.to_string(),
                cause,
            }),
            None => Ok(result),
        }
    }

    async fn route_phantom(&self, task: &Task, input: Value) -> Result<Value, KilnError> {
        let tunnel_tag = kiln_core::tunnel_tag_id();
        for entry in &self.store.resources {
            let resource_id = entry.key().clone();
            if !self.store.visibility.tags_of(&resource_id).contains(&tunnel_tag) {
                continue;
            }
            let Some(value) = entry.value().value() else {
                continue;
            };
            let Ok(router) = value.downcast::<Arc<dyn TunnelRouter>>() else {
                continue;
            };
            if router.routes_task(&task.id) {
                return router.run_task(&task.id, input).await;
            }
        }
        Err(KilnError::PhantomTaskNotRouted {
            task_id: task.id.to_string(),
        })
    }
}

/// Folds a composed task-middleware chain into one [`TaskNext`] whose
/// innermost stage invokes `run_fn`, then invokes it with `input`.
async fn run_chain(
    chain: Vec<MiddlewareAttachment>,
    task_id: Id,
    input: Value,
    deps: Deps,
    run_fn: TaskRunFn,
) -> Result<Value, KilnError> {
    let mut next: TaskNext = {
        let deps = deps.clone();
        Arc::new(move |override_input: Option<Value>| {
            let run_fn = run_fn.clone();
            let deps = deps.clone();
            let input = input.clone();
            Box::pin(async move { run_fn(override_input.unwrap_or(input), deps).await })
        })
    };

    for attachment in chain.into_iter().rev() {
        let mw = Arc::clone(&attachment.middleware);
        let inner_next = next.clone();
        let task_id = task_id.clone();
        let deps = deps.clone();
        next = Arc::new(move |override_input: Option<Value>| {
            let mw = Arc::clone(&mw);
            let inner_next = inner_next.clone();
            let task_id = task_id.clone();
            let deps = deps.clone();
            Box::pin(async move {
                let MiddlewareRun::Task(run) = &mw.run else {
                    return Err(KilnError::MiddlewareNotRegistered { id: mw.id.to_string() });
                };
                // `override_input` is always `Some` by construction: the fold
                // is seeded with `Some(input)` below, and every stage built
                // here only ever calls its own `inner_next` with `Some(...)`
                // (see `forwarded` below) — the `unwrap_or` is a defensive
                // fallback, never the live path.
                let current = override_input.unwrap_or(Value::Null);
                let forwarded = current.clone();
                // Exposed to the middleware body as `ctx.next`: `Some(x)`
                // overrides downstream input to `x`; `None` forwards `current`
                // unchanged, per the `next` contract in `middleware.rs`.
                let passthrough: TaskNext = Arc::new(move |next_override: Option<Value>| {
                    inner_next(Some(next_override.unwrap_or_else(|| forwarded.clone())))
                });
                let ctx = TaskMiddlewareContext {
                    task_id,
                    input: current,
                    next: passthrough,
                };
                run(ctx, deps).await
            })
        });
    }

    next(Some(input)).await
}

/// Common prelude.
pub mod prelude {
    pub use crate::{cancellation_signal, RunOptions, TaskRunner, TunnelRouter};
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_definitions::dependencies::DepSpec;
    use kiln_definitions::{Deps as DepsRecord, Item, Middleware, Resource, Schema};
    use parking_lot::Mutex as PMutex;
    use std::sync::Arc as StdArc;

    struct NullResolver;
    impl DepsResolver for NullResolver {
        fn resolve(&self, _spec: Option<&DepSpec>, _config: &Value) -> Result<DepsRecord, KilnError> {
            Ok(DepsRecord::empty())
        }
    }

    fn harness(root: Resource) -> (Arc<Store>, TaskRunner) {
        let store = Arc::new(Store::build(StdArc::new(root), Value::Null).unwrap());
        store.finalize().unwrap();
        let runner = TaskRunner::new(Arc::clone(&store), Arc::new(NullResolver));
        (store, runner)
    }

    #[tokio::test]
    async fn runs_a_plain_task() {
        let task = StdArc::new(Task::new("t.double", |input, _deps| {
            Box::pin(async move {
                let n = input.as_i64().unwrap_or(0);
                Ok(serde_json::json!(n * 2))
            })
        }));
        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(StdArc::new(()) as DynValue) }))
            .with_register(vec![Item::Task(task)]);
        let (_store, runner) = harness(root);
        let result = runner
            .run(&Id::new("t.double"), serde_json::json!(21), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(42));
    }

    #[tokio::test]
    async fn invalid_input_is_a_validation_error() {
        let task = StdArc::new(
            Task::new("t.strict", |input, _deps| Box::pin(async move { Ok(input) }))
                .with_input_schema(Schema::new(|v| {
                    if v.is_number() {
                        Ok(v.clone())
                    } else {
                        Err("expected a number".to_string())
                    }
                })),
        );
        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(StdArc::new(()) as DynValue) }))
            .with_register(vec![Item::Task(task)]);
        let (_store, runner) = harness(root);
        let err = runner
            .run(&Id::new("t.strict"), serde_json::json!("nope"), RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::Validation { subject: "Task input", .. }));
    }

    #[tokio::test]
    async fn phantom_task_without_tunnel_fails() {
        let task = StdArc::new(Task::phantom("p"));
        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(StdArc::new(()) as DynValue) }))
            .with_register(vec![Item::Task(task)]);
        let (_store, runner) = harness(root);
        let err = runner
            .run(&Id::new("p"), serde_json::json!({"v": "x"}), RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::PhantomTaskNotRouted { .. }));
    }

    #[tokio::test]
    async fn task_middleware_wraps_run_and_can_override_input() {
        let calls = StdArc::new(PMutex::new(Vec::<String>::new()));
        let c1 = StdArc::clone(&calls);
        let doubling = StdArc::new(
            Middleware::task("doubler", move |ctx: TaskMiddlewareContext, _deps| {
                let c = StdArc::clone(&c1);
                Box::pin(async move {
                    c.lock().push("before".to_string());
                    let doubled = serde_json::json!(ctx.input.as_i64().unwrap_or(0) * 2);
                    let result = (ctx.next)(Some(doubled)).await;
                    c.lock().push("after".to_string());
                    result
                })
            })
                .global(),
        );

        let task = StdArc::new(Task::new("t.echo", |input, _deps| Box::pin(async move { Ok(input) })));
        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(StdArc::new(()) as DynValue) }))
            .with_register(vec![Item::TaskMiddleware(doubling), Item::Task(task)]);
        let (_store, runner) = harness(root);
        let result = runner
            .run(&Id::new("t.echo"), serde_json::json!(5), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(10));
        assert_eq!(*calls.lock(), vec!["before", "after"]);
    }

    #[tokio::test]
    async fn cancelled_signal_short_circuits() {
        let task = StdArc::new(Task::new("t.slow", |_input, _deps| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(Value::Null)
            })
        }));
        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(StdArc::new(()) as DynValue) }))
            .with_register(vec![Item::Task(task)]);
        let (_store, runner) = harness(root);

        let signal = CancellationToken::new();
        signal.cancel();
        let err = runner
            .run(&Id::new("t.slow"), Value::Null, RunOptions { signal: Some(signal) })
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::Cancellation));
    }
}
