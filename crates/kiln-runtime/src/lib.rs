//! # Kiln Runtime
//!
//! The public entry point: composes
//! `kiln-store`, `kiln-graph`, `kiln-context`, `kiln-eventbus`,
//! `kiln-resource`, and `kiln-task` behind one `run(root, options) →
//! RunResult` thin facade: build, validate, wire, initialize, hand back a
//! handle — no orchestration logic lives anywhere but here.
//!
//! This crate adds no new behavior of its own beyond that wiring (plus the
//! [`resolver::RuntimeResolver`] bridge [`kiln_store::DepsResolver`] needs
//! a concrete implementation of) and the supplemented [`platform`]/
//! [`shutdown`] helpers described in the design notes.

mod resolver;
pub mod platform;
pub mod shutdown;

use std::sync::Arc;

use kiln_core::Id;
use kiln_definitions::dependencies::{BoxFuture, DynValue};
use kiln_definitions::{Event, Hook, Item, Middleware, Resource, Task};
pub use kiln_definitions::{override_event, override_hook, override_middleware, override_resource, override_task};
use kiln_error::KilnError;
pub use kiln_error::ErrorHelper;
pub use kiln_context::AsyncContext;
use kiln_eventbus::EventManager;
use kiln_resource::ResourceInitializer;
use kiln_store::entry::ResourceEntry;
use kiln_store::{DepsResolver, Store};
use kiln_task::TaskRunner;
pub use kiln_task::RunOptions as TaskRunOptions;
pub use kiln_tunnel::assert_task_routed;
use parking_lot::Mutex;
use resolver::RuntimeResolver;
use serde_json::Value;

/// Options accepted by [`run`].
#[derive(Default)]
pub struct RunOptions {
    /// The root resource's config, as it would be passed to `register()`'s
    /// top-level factory.
    pub config: Value,
}

/// Options accepted by [`create_test_resource`].
#[derive(Default)]
pub struct TestOptions {
    /// Definitions replacing same-id/same-kind units already present in
    /// `root`'s registration tree, applied after the store is built and
    /// before finalization (so overridden dependency specs still resolve
    /// against the final graph).
    pub overrides: Vec<Item>,
    /// Async-context bindings held for the duration of initialization
    /// *and* every call made through the returned [`RunResult`]. Each entry
    /// is the closure an [`AsyncContext::provide`] call produces —
    /// build one per bound context with [`wrap_context`].
    pub initial_contexts: Vec<ContextWrapper>,
}

/// A type-erased `AsyncContext::provide` call, wrapping a boxed future in
/// one bound context. See [`wrap_context`].
pub type ContextWrapper =
    Arc<dyn Fn(BoxFuture<'static, Result<RunResult, KilnError>>) -> BoxFuture<'static, Result<RunResult, KilnError>> + Send + Sync>;

/// Builds a [`ContextWrapper`] binding `context` to `value` around whatever
/// future it wraps — the piece [`TestOptions::initial_contexts`] needs,
/// since a bare `AsyncContext<T>` is generic over `T` and can't be stored
/// in a homogeneous `Vec` directly.
pub fn wrap_context<T>(context: AsyncContext<T>, value: T) -> ContextWrapper
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(move |fut| {
        let context = context.clone();
        let value = value.clone();
        Box::pin(async move { context.provide(value, fut).await })
    })
}

/// `createContext(id)`: declares a new async context, thinly wrapping
/// [`AsyncContext::new`] under the name the public surface uses.
#[must_use]
pub fn create_context<T: Clone + Send + Sync + 'static>(id: impl Into<Id>) -> AsyncContext<T> {
    AsyncContext::new(id)
}

/// `defineTask`: identity function returning a decorated record.
#[must_use]
pub fn define_task(task: Task) -> Task {
    task
}

/// `defineResource`.
#[must_use]
pub fn define_resource(resource: Resource) -> Resource {
    resource
}

/// `defineEvent`.
#[must_use]
pub fn define_event(event: Event) -> Event {
    event
}

/// `defineHook`.
#[must_use]
pub fn define_hook(hook: Hook) -> Hook {
    hook
}

/// `defineMiddleware`, task-flavored.
#[must_use]
pub fn define_task_middleware(middleware: Middleware) -> Middleware {
    middleware
}

/// `defineMiddleware`, resource-flavored.
#[must_use]
pub fn define_resource_middleware(middleware: Middleware) -> Middleware {
    middleware
}

/// `defineTag`.
#[must_use]
pub fn define_tag(tag: kiln_core::Tag) -> kiln_core::Tag {
    tag
}

/// The handle `run`/`createTestResource` return: the root resource's
/// initialized value, plus every entry point a caller drives the runtime
/// through afterward.
pub struct RunResult {
    store: Arc<Store>,
    task_runner: Arc<TaskRunner>,
    events: Arc<EventManager>,
    initializer: Arc<ResourceInitializer>,
    init_order: Mutex<Vec<Id>>,
    root_value: Option<DynValue>,
}

impl RunResult {
    /// The registry this run was built from, for callers that need direct
    /// store access (introspection, test assertions).
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The root resource's initialized value, downcast to `T`.
    ///
    /// # Errors
    /// Returns [`KilnError::ResourceNotFound`] if the root never
    /// initialized (shouldn't happen — `run` fails before returning a
    /// `RunResult` if it didn't), or [`KilnError::DependencyNotFound`] if
    /// `T` doesn't match the root's actual value type.
    pub fn value<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, KilnError> {
        let value = self.root_value.clone().ok_or_else(|| KilnError::ResourceNotFound {
            id: self.store.root_id.to_string(),
        })?;
        value.downcast::<T>().map_err(|_| KilnError::DependencyNotFound {
            consumer_id: String::new(),
            dependency_id: self.store.root_id.to_string(),
        })
    }

    /// `runTask`: invokes a registered task by id.
    ///
    /// # Errors
    /// See [`TaskRunner::run`].
    pub async fn run_task(&self, id: &Id, input: Value, options: TaskRunOptions) -> Result<Value, KilnError> {
        self.task_runner.run(id, input, options).await
    }

    /// `getResourceValue`: looks up an initialized resource's value by
    /// id, downcast to `T`.
    ///
    /// # Errors
    /// Returns [`KilnError::ResourceNotFound`] if `id` isn't registered or
    /// hasn't initialized, or [`KilnError::DependencyNotFound`] if `T`
    /// doesn't match its actual value type.
    pub fn get_resource_value<T: Send + Sync + 'static>(&self, id: &Id) -> Result<Arc<T>, KilnError> {
        let entry = self.store.get_resource(id)?;
        let value = entry.value().ok_or_else(|| KilnError::ResourceNotFound { id: id.to_string() })?;
        value.downcast::<T>().map_err(|_| KilnError::DependencyNotFound {
            consumer_id: String::new(),
            dependency_id: id.to_string(),
        })
    }

    /// `emitEvent`: emits a registered event by id.
    ///
    /// # Errors
    /// See [`EventManager::emit`].
    pub async fn emit_event(&self, id: &Id, payload: Value) -> Result<(), KilnError> {
        self.events.emit(id, payload, Some("run".to_string())).await
    }

    /// `dispose`: disposes every initialized resource, reverse init
    /// order, aggregating failures rather than stopping at the first one.
    ///
    /// # Errors
    /// See [`ResourceInitializer::dispose`].
    pub async fn dispose(&self) -> Result<(), KilnError> {
        let order = self.init_order.lock().clone();
        self.initializer.dispose(&order).await
    }
}

/// `run(root, options?)`: builds the store from `root`'s registration
/// tree, validates the whole graph, then initializes every resource
/// ancestor-before-dependent.
///
/// # Errors
/// Returns the first [`KilnError`] raised by registration, finalization,
/// graph validation, or resource initialization.
pub async fn run(root: Arc<Resource>, options: RunOptions) -> Result<RunResult, KilnError> {
    let store = Arc::new(Store::build(root, options.config)?);
    store.finalize()?;
    kiln_graph::validate_all(&store)?;
    wire_and_initialize(store).await
}

/// `createTestResource(root, { overrides?, initialContexts? })`: the
/// same build-validate-initialize pipeline as [`run`], with `options.overrides`
/// applied to the store before finalization and `options.initial_contexts`
/// bound for the duration of initialization and every later call made
/// through the returned [`RunResult`].
///
/// # Errors
/// Same as [`run`].
pub async fn create_test_resource(root: Arc<Resource>, options: TestOptions) -> Result<RunResult, KilnError> {
    let store = Store::build(root, Value::Null)?;
    apply_overrides(&store, options.overrides);
    let store = Arc::new(store);
    store.finalize()?;
    kiln_graph::validate_all(&store)?;

    let mut fut: BoxFuture<'static, Result<RunResult, KilnError>> = Box::pin(wire_and_initialize(store));
    for wrap in options.initial_contexts.into_iter().rev() {
        fut = wrap(fut);
    }
    fut.await
}

/// Replaces same-id/same-kind units already in `store` with `overrides`
///. A resource override keeps the
/// original's registered config unless the override item carries its own.
fn apply_overrides(store: &Store, overrides: Vec<Item>) {
    for item in overrides {
        match item {
            Item::Task(task) => {
                store.tasks.insert(task.id.clone(), task);
            }
            Item::Resource(resource, config) => {
                let config = config.unwrap_or_else(|| {
                    store
                        .resources
                        .get(&resource.id)
                        .map(|entry| entry.config.clone())
                        .unwrap_or(Value::Null)
                });
                store
                    .resources
                    .insert(resource.id.clone(), Arc::new(ResourceEntry::new(resource, config)));
            }
            Item::Event(event) => {
                store.events.insert(event.id.clone(), event);
            }
            Item::Hook(hook) => {
                store.hooks.insert(hook.id.clone(), hook);
            }
            Item::TaskMiddleware(m) => {
                store.task_middleware.insert(m.id.clone(), m);
            }
            Item::ResourceMiddleware(m) => {
                store.resource_middleware.insert(m.id.clone(), m);
            }
            Item::Tag(tag) => {
                store.tags.insert(tag.id().clone(), tag);
            }
        }
    }
}

/// The part of `run`/`create_test_resource` that's actually shared:
/// constructing the resolver/event-manager/task-runner triad (binding the
/// circular reference between them, see [`resolver::RuntimeResolver`]),
/// then driving initialization to completion.
async fn wire_and_initialize(store: Arc<Store>) -> Result<RunResult, KilnError> {
    let resolver = Arc::new(RuntimeResolver::new(Arc::clone(&store)));
    let events = Arc::new(EventManager::new(&store, Arc::clone(&resolver) as Arc<dyn DepsResolver>));
    let task_runner = Arc::new(TaskRunner::new(Arc::clone(&store), Arc::clone(&resolver) as Arc<dyn DepsResolver>));
    resolver.bind(Arc::clone(&task_runner), Arc::clone(&events));

    let initializer = Arc::new(ResourceInitializer::new(
        Arc::clone(&store),
        Arc::clone(&events),
        Arc::clone(&resolver) as Arc<dyn DepsResolver>,
    ));
    let init_order = initializer.initialize().await?;
    let root_value = store.get_resource(&store.root_id)?.value();

    Ok(RunResult {
        store,
        task_runner,
        events,
        initializer,
        init_order: Mutex::new(init_order),
        root_value,
    })
}

/// Common prelude.
pub mod prelude {
    pub use crate::{
        assert_task_routed, create_context, create_test_resource, define_event, define_hook,
        define_resource, define_resource_middleware, define_tag, define_task, define_task_middleware,
        override_event, override_hook, override_middleware, override_resource, override_task, run,
        wrap_context, AsyncContext, ErrorHelper, RunOptions, RunResult, TaskRunOptions, TestOptions,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_definitions::dependencies::DepSpec;
    use kiln_definitions::Task as TaskDef;

    fn noop_resource(id: &str) -> Resource {
        Resource::new(id, |_cfg, _deps| Box::pin(async { Ok(Arc::new(()) as DynValue) }))
    }

    #[tokio::test]
    async fn run_initializes_and_exposes_the_root_value() {
        let root = Arc::new(Resource::new("root", |_c, _d| {
            Box::pin(async { Ok(Arc::new(7_i32) as DynValue) })
        }));
        let result = run(root, RunOptions::default()).await.unwrap();
        assert_eq!(*result.value::<i32>().unwrap(), 7);
    }

    #[tokio::test]
    async fn run_task_and_emit_event_round_trip_through_run_result() {
        let task = Arc::new(TaskDef::new("t.double", |input, _deps| {
            Box::pin(async move { Ok(serde_json::json!(input.as_i64().unwrap_or(0) * 2)) })
        }));
        let root = Arc::new(noop_resource("root").with_register(vec![Item::Task(task)]));
        let result = run(root, RunOptions::default()).await.unwrap();

        let doubled = result
            .run_task(&Id::new("t.double"), serde_json::json!(21), TaskRunOptions::default())
            .await
            .unwrap();
        assert_eq!(doubled, serde_json::json!(42));

        result.emit_event(&Id::new("root.afterInit"), Value::Null).await.unwrap();
    }

    #[tokio::test]
    async fn create_test_resource_applies_a_task_override() {
        let real = Arc::new(TaskDef::new("t.greet", |_input, _deps| {
            Box::pin(async move { Ok(serde_json::json!("real")) })
        }));
        let root = Arc::new(noop_resource("root").with_register(vec![Item::Task(real)]));

        let mock = TaskDef::new("unused", |_input, _deps| Box::pin(async move { Ok(serde_json::json!("mock")) }));
        let overridden = override_task(&TaskDef::new("t.greet", |i, _d| Box::pin(async move { Ok(i) })), mock);

        let options = TestOptions {
            overrides: vec![Item::Task(Arc::new(overridden))],
            initial_contexts: Vec::new(),
        };
        let result = create_test_resource(root, options).await.unwrap();
        let greeted = result
            .run_task(&Id::new("t.greet"), Value::Null, TaskRunOptions::default())
            .await
            .unwrap();
        assert_eq!(greeted, serde_json::json!("mock"));
    }

    #[tokio::test]
    async fn create_test_resource_binds_initial_contexts_around_initialization() {
        let tenant: AsyncContext<u32> = create_context("tenant");
        let observed = Arc::new(parking_lot::Mutex::new(None));
        let o = Arc::clone(&observed);
        let tenant_clone = tenant.clone();
        let root = Arc::new(Resource::new("root", move |_c, _d| {
            let o = Arc::clone(&o);
            let tenant = tenant_clone.clone();
            Box::pin(async move {
                *o.lock() = tenant.try_use();
                Ok(Arc::new(()) as DynValue)
            })
        }));

        let options = TestOptions {
            overrides: Vec::new(),
            initial_contexts: vec![wrap_context(tenant, 42)],
        };
        create_test_resource(root, options).await.unwrap();
        assert_eq!(*observed.lock(), Some(42));
    }

    #[tokio::test]
    async fn dispose_runs_disposers_in_reverse_order() {
        let calls = Arc::new(parking_lot::Mutex::new(Vec::<&'static str>::new()));
        let c1 = Arc::clone(&calls);
        let db = Resource::new("db", move |_c, _d| {
            let c = Arc::clone(&c1);
            Box::pin(async move {
                c.lock().push("db-init");
                Ok(Arc::new(()) as DynValue)
            })
        })
            .with_dispose(move |_v, _c, _d| Box::pin(async move { Ok(()) }));

        let root = Arc::new(noop_resource("root").with_register(vec![Item::Resource(Arc::new(db), Some(Value::Null))]));
        let result = run(root, RunOptions::default()).await.unwrap();
        result.dispose().await.unwrap();
        let _ = DepSpec::fixed::<&str, &str>([]); // keep import alive for doc clarity
    }
}
