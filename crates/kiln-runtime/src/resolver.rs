//! The [`DepsResolver`] implementation binding a live [`Store`] to a
//! [`TaskRunner`] and [`EventManager`]:
//! turning a resolved `{key -> Id}` map into the [`Deps`] record a
//! consumer's body actually receives.
//!
//! Construction is circular by nature: [`TaskRunner::new`] and
//! [`EventManager::new`] both need a `resolver: Arc<dyn DepsResolver>` up
//! front, but a resolver that can wrap task invocation/event emission needs
//! live handles back to *them*. Neither is ever called before
//! [`RuntimeResolver::bind`] runs — [`Store::finalize`] only computes
//! `{key -> Id}` maps, and no resource inits until `run` drives
//! [`kiln_resource::ResourceInitializer::initialize`] — so the two
//! [`OnceLock`] slots below are always populated before the first
//! `resolve` call reaches them.

use std::sync::{Arc, OnceLock};

use kiln_definitions::dependencies::{DepSpec, DepValue, Deps};
use kiln_error::KilnError;
use kiln_eventbus::EventManager;
use kiln_store::{DepsResolver, Store};
use kiln_task::{RunOptions, TaskRunner};
use serde_json::Value;

/// Resolves a unit's dependency map against the live store, wrapping task
/// and event ids into invocable closures and looking resource ids up by
/// their initialized value.
pub struct RuntimeResolver {
    store: Arc<Store>,
    task_runner: OnceLock<Arc<TaskRunner>>,
    events: OnceLock<Arc<EventManager>>,
}

impl RuntimeResolver {
    /// Builds an unbound resolver over `store`. Call [`Self::bind`] with
    /// the task runner and event manager constructed against this same
    /// resolver before any dependency resolution can happen.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            task_runner: OnceLock::new(),
            events: OnceLock::new(),
        }
    }

    /// Completes construction, handing the resolver the live runner/events
    /// it needed at its own construction time.
    ///
    /// # Panics
    /// Panics if called more than once — `run` calls this exactly once,
    /// immediately after constructing both arguments.
    pub fn bind(&self, task_runner: Arc<TaskRunner>, events: Arc<EventManager>) {
        self.task_runner
            .set(task_runner)
            .unwrap_or_else(|_| panic!("RuntimeResolver::bind called twice"));
        self.events
            .set(events)
            .unwrap_or_else(|_| panic!("RuntimeResolver::bind called twice"));
    }
}

impl DepsResolver for RuntimeResolver {
    fn resolve(&self, spec: Option<&DepSpec>, config: &Value) -> Result<Deps, KilnError> {
        let Some(spec) = spec else {
            return Ok(Deps::empty());
        };
        let resolved = spec.resolve(config);

        let mut entries = indexmap::IndexMap::new();
        for (key, id) in resolved {
            let value = if let Ok(entry) = self.store.get_resource(&id) {
                let Some(value) = entry.value() else {
                    return Err(KilnError::DependencyNotFound {
                        consumer_id: String::new(),
                        dependency_id: id.to_string(),
                    });
                };
                DepValue::Resource(value)
            } else if self.store.tasks.contains_key(&id) {
                let task_runner = Arc::clone(
                    self.task_runner
                        .get()
                        .expect("RuntimeResolver::bind runs before any resolve() call"),
                );
                let task_id = id.clone();
                DepValue::Task(Arc::new(move |input: Value| {
                    let task_runner = Arc::clone(&task_runner);
                    let task_id = task_id.clone();
                    Box::pin(async move { task_runner.run(&task_id, input, RunOptions::default()).await })
                }))
            } else if self.store.events.contains_key(&id) {
                let events = Arc::clone(
                    self.events
                        .get()
                        .expect("RuntimeResolver::bind runs before any resolve() call"),
                );
                let event_id = id.clone();
                DepValue::Event(Arc::new(move |payload: Value| {
                    let events = Arc::clone(&events);
                    let event_id = event_id.clone();
                    Box::pin(async move { events.emit(&event_id, payload, Some("dependency".to_string())).await })
                }))
            } else {
                return Err(KilnError::DependencyNotFound {
                    consumer_id: String::new(),
                    dependency_id: id.to_string(),
                });
            };
            entries.insert(key, value);
        }

        Ok(Deps::new(entries))
    }
}
