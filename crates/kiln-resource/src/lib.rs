//! # Kiln Resource
//!
//! Ordered resource initialization and disposal: a topological
//! layering over the resource-only dependency graph
//! ([`ordering::compute_layers`]), `beforeInit`/`afterInit`/`onError`
//! lifecycle events around each resource's composed middleware chain, and
//! reverse-order disposal that aggregates failures rather than stopping at
//! the first one.

pub mod ordering;

use std::sync::Arc;

use futures::future::join_all;
use kiln_core::Id;
use kiln_definitions::dependencies::{Deps, DynValue};
use kiln_definitions::middleware::{compose_chain, MiddlewareAttachment, MiddlewareRun, ResourceMiddlewareContext, ResourceNext};
use kiln_definitions::resource::ResourceInitFn;
use kiln_error::KilnError;
use kiln_eventbus::EventManager;
use kiln_store::{DepsResolver, Store};
use serde_json::Value;

/// Drives resource initialization and disposal for one `Store`.
pub struct ResourceInitializer {
    store: Arc<Store>,
    events: Arc<EventManager>,
    resolver: Arc<dyn DepsResolver>,
}

impl ResourceInitializer {
    /// Builds an initializer over `store`, dispatching lifecycle events
    /// through `events` and resolving dependency maps through `resolver`.
    #[must_use]
    pub fn new(store: Arc<Store>, events: Arc<EventManager>, resolver: Arc<dyn DepsResolver>) -> Self {
        Self { store, events, resolver }
    }

    /// Initializes every registered resource, ancestor before dependent
    ///, racing independent resources within the same
    /// topological layer.
    ///
    /// On failure, every resource that did succeed before the failure is
    /// disposed in reverse order (logging, not propagating, any disposer
    /// failures — the *init* failure is what gets returned; a caller
    /// wanting disposal failures surfaced too should inspect the logs or
    /// call [`Self::dispose`] again, which is idempotent against already
    /// cleared entries).
    ///
    /// # Errors
    /// Returns the first resource init failure encountered. Returns
    /// [`KilnError::ParallelInitScheduling`] if the resource graph has a
    /// cycle (should already have been rejected by `kiln-graph`).
    pub async fn initialize(&self) -> Result<Vec<Id>, KilnError> {
        let layers = ordering::compute_layers(&self.store)?;
        let mut init_order: Vec<Id> = Vec::new();
        let mut failure: Option<KilnError> = None;

        for layer in layers {
            if layer.is_empty() {
                continue;
            }
            let results = join_all(layer.iter().map(|id| self.init_one(id))).await;
            let mut layer_failure: Option<KilnError> = None;
            for (id, result) in layer.iter().zip(results) {
                match result {
                    Ok(()) => init_order.push(id.clone()),
                    Err(err) => {
                        tracing::error!(resource = %id, error = %err, "resource init failed");
                        if layer_failure.is_none() {
                            layer_failure = Some(err);
                        }
                    }
                }
            }
            if let Some(err) = layer_failure {
                failure = Some(err);
                break;
            }
        }

        if let Some(err) = failure {
            if let Err(dispose_err) = self.dispose(&init_order).await {
                tracing::error!(error = %dispose_err, "disposal after failed init also failed");
            }
            return Err(err);
        }

        Ok(init_order)
    }

    async fn init_one(&self, id: &Id) -> Result<(), KilnError> {
        let entry = self.store.get_resource(id)?;
        let resource = Arc::clone(&entry.definition);

        self.events
            .emit(&resource.before_init_event_id(), Value::Null, Some("resource:init".to_string()))
            .await?;

        let deps = self.resolver.resolve(resource.dependencies.as_ref(), &entry.config)?;

        let pool: Vec<Arc<_>> = self.store.resource_middleware.iter().map(|e| Arc::clone(e.value())).collect();
        let consumer_tags: Vec<Id> = self.store.visibility.tags_of(id).into_iter().collect();
        let chain = compose_chain(pool, &consumer_tags, resource.middleware.clone());

        let init_result = run_chain(chain, id.clone(), resource.init.clone(), entry.config.clone(), deps).await;

        match init_result {
            Ok(value) => {
                entry.mark_initialized(value);
                self.events
                    .emit(&resource.after_init_event_id(), Value::Null, Some("resource:init".to_string()))
                    .await?;
                Ok(())
            }
            Err(err) => {
                let _ = self
                    .events
                    .emit(
                        &resource.on_error_event_id(),
                        serde_json::json!({ "message": err.to_string() }),
                        Some("resource:init".to_string()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    /// Disposes every resource named in `order`, in reverse, continuing
    /// past individual failures and aggregating them.
    /// Always clears each entry's lifecycle state regardless of whether its
    /// disposer succeeded.
    ///
    /// # Errors
    /// Returns [`KilnError::ResourceDisposalFailures`] if any disposer
    /// failed, carrying every failure's message in dispose order.
    pub async fn dispose(&self, order: &[Id]) -> Result<(), KilnError> {
        let mut failures = Vec::new();
        for id in order.iter().rev() {
            let Ok(entry) = self.store.get_resource(id) else {
                continue;
            };
            if !entry.is_initialized() {
                continue;
            }
            if let Some(dispose_fn) = entry.definition.dispose.clone() {
                let Some(value) = entry.value() else { continue };
                let deps = self
                    .resolver
                    .resolve(entry.definition.dependencies.as_ref(), &entry.config)
                    .unwrap_or_else(|_| Deps::empty());
                if let Err(err) = dispose_fn(value, entry.config.clone(), deps).await {
                    tracing::error!(resource = %id, error = %err, "resource dispose failed");
                    failures.push(err.to_string());
                }
            }
            entry.clear();
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(KilnError::ResourceDisposalFailures { errors: failures })
        }
    }
}

/// Folds a composed resource-middleware chain into one [`ResourceNext`]
/// whose innermost stage calls `init` itself, then invokes it.
async fn run_chain(
    chain: Vec<MiddlewareAttachment>,
    resource_id: Id,
    init: ResourceInitFn,
    config: Value,
    deps: Deps,
) -> Result<DynValue, KilnError> {
    let mut next: ResourceNext = {
        let config = config.clone();
        let deps = deps.clone();
        Arc::new(move || {
            let init = init.clone();
            let config = config.clone();
            let deps = deps.clone();
            Box::pin(async move { init(config, deps).await })
        })
    };

    for attachment in chain.into_iter().rev() {
        let mw = Arc::clone(&attachment.middleware);
        let inner_next = next.clone();
        let resource_id = resource_id.clone();
        let config = config.clone();
        let deps = deps.clone();
        next = Arc::new(move || {
            let mw = Arc::clone(&mw);
            let inner_next = inner_next.clone();
            let resource_id = resource_id.clone();
            let config = config.clone();
            let deps = deps.clone();
            Box::pin(async move {
                let MiddlewareRun::Resource(run) = &mw.run else {
                    return Err(KilnError::MiddlewareNotRegistered { id: mw.id.to_string() });
                };
                let ctx = ResourceMiddlewareContext {
                    resource_id,
                    config,
                    next: inner_next,
                };
                run(ctx, deps).await
            })
        });
    }

    next().await
}

/// Common prelude.
pub mod prelude {
    pub use crate::ResourceInitializer;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_definitions::dependencies::DepValue;
    use kiln_definitions::{Deps as DepsRecord, Item, Middleware, Resource};
    use parking_lot::Mutex as PMutex;
    use std::sync::Arc as StdArc;

    struct NullResolver;
    impl DepsResolver for NullResolver {
        fn resolve(&self, _spec: Option<&kiln_definitions::DepSpec>, _config: &Value) -> Result<DepsRecord, KilnError> {
            Ok(DepsRecord::empty())
        }
    }

    fn harness(root: Resource) -> (Arc<Store>, ResourceInitializer) {
        let store = Arc::new(Store::build(StdArc::new(root), Value::Null).unwrap());
        store.finalize().unwrap();
        let events = Arc::new(EventManager::new(&store, Arc::new(NullResolver) as Arc<dyn DepsResolver>));
        let initializer = ResourceInitializer::new(Arc::clone(&store), events, Arc::new(NullResolver));
        (store, initializer)
    }

    #[tokio::test]
    async fn initializes_ancestor_before_dependent() {
        let order = Arc::new(PMutex::new(Vec::<&'static str>::new()));
        let o1 = Arc::clone(&order);
        let db = Resource::new("db", move |_c, _d| {
            let o = Arc::clone(&o1);
            Box::pin(async move {
                o.lock().push("db");
                Ok(Arc::new(()) as DynValue)
            })
        });
        let o2 = Arc::clone(&order);
        let api = Resource::new("api", move |_c, _d| {
            let o = Arc::clone(&o2);
            Box::pin(async move {
                o.lock().push("api");
                Ok(Arc::new(()) as DynValue)
            })
        })
            .with_dependencies(kiln_definitions::DepSpec::fixed([("db", Id::new("db"))]));

        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) })).with_register(
            vec![
                Item::Resource(StdArc::new(db), Some(Value::Null)),
                Item::Resource(StdArc::new(api), Some(Value::Null)),
            ],
        );
        let (_store, initializer) = harness(root);
        let init_order = initializer.initialize().await.unwrap();
        assert_eq!(*order.lock(), vec!["db", "api"]);
        assert_eq!(init_order, vec![Id::new("db"), Id::new("api"), Id::new("root")]);
    }

    #[tokio::test]
    async fn failed_init_disposes_already_initialized_resources_in_reverse() {
        let disposed = Arc::new(PMutex::new(Vec::<&'static str>::new()));
        let d1 = Arc::clone(&disposed);
        let safe = Resource::new("safe", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) }))
            .with_dispose(move |_v, _c, _d| {
                let d = Arc::clone(&d1);
                Box::pin(async move {
                    d.lock().push("safe");
                    Ok(())
                })
            });
        let failing = Resource::new("failing", |_c, _d| {
            Box::pin(async { Err(KilnError::PlatformUnreachable) })
        });

        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) })).with_register(
            vec![
                Item::Resource(StdArc::new(safe), Some(Value::Null)),
                Item::Resource(StdArc::new(failing), Some(Value::Null)),
            ],
        );
        let (store, initializer) = harness(root);
        let err = initializer.initialize().await.unwrap_err();
        assert!(matches!(err, KilnError::PlatformUnreachable));
        assert!(disposed.lock().contains(&"safe"));
        assert!(!store.get_resource(&Id::new("safe")).unwrap().is_initialized());
    }

    #[tokio::test]
    async fn dispose_aggregates_failures_but_still_runs_every_disposer() {
        let disposed = Arc::new(PMutex::new(Vec::<&'static str>::new()));
        let d1 = Arc::clone(&disposed);
        let safe = Resource::new("safe", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) }))
            .with_dispose(move |_v, _c, _d| {
                let d = Arc::clone(&d1);
                Box::pin(async move {
                    d.lock().push("safe");
                    Ok(())
                })
            });
        let failing = Resource::new("failing", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) }))
            .with_dispose(|_v, _c, _d| {
                Box::pin(async { Err(KilnError::PlatformUnreachable) })
            });

        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) })).with_register(
            vec![
                Item::Resource(StdArc::new(safe), Some(Value::Null)),
                Item::Resource(StdArc::new(failing), Some(Value::Null)),
            ],
        );
        let (_store, initializer) = harness(root);
        let order = initializer.initialize().await.unwrap();
        let err = initializer.dispose(&order).await.unwrap_err();
        assert!(matches!(err, KilnError::ResourceDisposalFailures { .. }));
        assert!(disposed.lock().contains(&"safe"));
    }

    #[tokio::test]
    async fn resource_middleware_wraps_init() {
        let calls = Arc::new(PMutex::new(Vec::<&'static str>::new()));
        let c1 = Arc::clone(&calls);
        let logging = StdArc::new(
            Middleware::resource(
                "logging",
                move |ctx: kiln_definitions::middleware::ResourceMiddlewareContext, _deps| {
                    let c = Arc::clone(&c1);
                    Box::pin(async move {
                        c.lock().push("before");
                        let result = (ctx.next)().await;
                        c.lock().push("after");
                        result
                    })
                },
            )
                .global(),
        );

        let c2 = Arc::clone(&calls);
        let db = Resource::new("db", move |_c, _d| {
            let c = Arc::clone(&c2);
            Box::pin(async move {
                c.lock().push("init");
                Ok(Arc::new(()) as DynValue)
            })
        });

        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) })).with_register(
            vec![
                Item::ResourceMiddleware(logging),
                Item::Resource(StdArc::new(db), Some(Value::Null)),
            ],
        );
        let (_store, initializer) = harness(root);
        initializer.initialize().await.unwrap();
        assert_eq!(*calls.lock(), vec!["before", "init", "after"]);
        let _ = DepValue::Resource(Arc::new(()) as DynValue); // keep import alive for doc clarity
    }
}
