//! # Kiln Store
//!
//! The registry built from a root resource's `register` tree:
//! every [`Task`]/[`Resource`]/[`Event`]/[`Hook`]/task- and
//! resource-[`Middleware`]/[`Tag`] encountered during the walk lands in
//! its own map, duplicate ids fail fast, and the [`visibility::VisibilityTracker`]
//! records ownership/subtree/export/policy/tag bookkeeping alongside it.
//!
//! `Store::build` performs the walk; `Store::finalize` resolves
//! config-driven dependency specs into plain `{key -> Id}` maps once every
//! unit (and every resource's config) is known.

pub mod entry;
pub mod visibility;

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use kiln_core::{Id, Kind, Tag};
use kiln_definitions::{DepSpec, Deps, Event, Hook, Item, Middleware, Resource, Task};
use kiln_error::KilnError;
use serde_json::Value;

pub use entry::ResourceEntry;
pub use visibility::VisibilityTracker;

/// The registry built from a `register` tree.
#[derive(Default)]
pub struct Store {
    /// Registered tasks, by id.
    pub tasks: DashMap<Id, Arc<Task>>,
    /// Registered resources (definition + lifecycle state), by id.
    pub resources: DashMap<Id, Arc<ResourceEntry>>,
    /// Resource ids in the order they were registered, needed to break
    /// topological-layer ties deterministically.
    pub resource_registration_order: parking_lot::Mutex<Vec<Id>>,
    /// Registered events, by id.
    pub events: DashMap<Id, Arc<Event>>,
    /// Registered hooks, by id.
    pub hooks: DashMap<Id, Arc<Hook>>,
    /// Hook ids in the order they were registered, needed to break order
    /// ties deterministically — a `DashMap` has no
    /// iteration order of its own.
    pub hook_registration_order: parking_lot::Mutex<Vec<Id>>,
    /// Registered task middlewares, by id.
    pub task_middleware: DashMap<Id, Arc<Middleware>>,
    /// Registered resource middlewares, by id.
    pub resource_middleware: DashMap<Id, Arc<Middleware>>,
    /// Registered tags, by id.
    pub tags: DashMap<Id, Tag>,
    /// Visibility bookkeeping gathered alongside registration.
    pub visibility: VisibilityTracker,
    /// The id of the root resource.
    pub root_id: Id,
}

impl Store {
    /// Walks `root`'s registration tree (with `root_config` applied) and
    /// builds the store, failing on the first duplicate id encountered.
    ///
    /// # Errors
    /// Returns [`KilnError::DuplicateRegistration`] if any two units share
    /// an id within the same kind.
    pub fn build(root: Arc<Resource>, root_config: Value) -> Result<Self, KilnError> {
        let mut store = Self {
            root_id: root.id.clone(),
            ..Self::default()
        };

        // The root owns itself.
        store.visibility.record_ownership(root.id.clone(), root.id.clone());

        let mut queue: VecDeque<(Item, Id)> =
            VecDeque::from([(Item::Resource(Arc::clone(&root), Some(root_config)), root.id.clone())]);

        while let Some((item, owner)) = queue.pop_front() {
            let id = item.id();
            tracing::debug!(id = %id, owner = %owner, kind = %item.kind(), "registering unit");
            if id != owner {
                store.visibility.record_ownership(id.clone(), owner.clone());
            }
            store.visibility.bubble_subtree_membership(&owner, &id);
            store.visibility.record_tags(&id, item_tag_ids(&item));

            match item {
                Item::Resource(resource, config) => {
                    let config = config.unwrap_or(Value::Null);
                    store.install_resource(Arc::clone(&resource), config.clone())?;
                    store.visibility.mark_known_resource(resource.id.clone());
                    if let Some(exports) = &resource.exports {
                        store
                            .visibility
                            .record_export_set(resource.id.clone(), exports.clone());
                    }
                    if let Some(policy) = &resource.dependency_access_policy {
                        store
                            .visibility
                            .record_access_policy(resource.id.clone(), policy.clone());
                    }
                    for event in resource.lifecycle_events() {
                        store.install_event(Arc::new(event), resource.id.clone())?;
                    }
                    if let Some(register) = &resource.register {
                        for child in register.resolve(&config) {
                            queue.push_back((child, resource.id.clone()));
                        }
                    }
                }
                Item::Task(task) => store.install_task(task)?,
                Item::Event(event) => store.install_event(event, owner)?,
                Item::Hook(hook) => store.install_hook(hook)?,
                Item::TaskMiddleware(m) => store.install_task_middleware(m)?,
                Item::ResourceMiddleware(m) => store.install_resource_middleware(m)?,
                Item::Tag(tag) => store.install_tag(tag)?,
            }
        }

        Ok(store)
    }

    fn install_task(&self, task: Arc<Task>) -> Result<(), KilnError> {
        if self.tasks.contains_key(&task.id) {
            return Err(KilnError::DuplicateRegistration {
                kind: Kind::Task,
                id: task.id.to_string(),
            });
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    fn install_resource(&self, resource: Arc<Resource>, config: Value) -> Result<(), KilnError> {
        if self.resources.contains_key(&resource.id) {
            return Err(KilnError::DuplicateRegistration {
                kind: Kind::Resource,
                id: resource.id.to_string(),
            });
        }
        let id = resource.id.clone();
        self.resource_registration_order.lock().push(id.clone());
        self.resources
            .insert(id, Arc::new(ResourceEntry::new(resource, config)));
        Ok(())
    }

    /// Resource ids in registration order.
    #[must_use]
    pub fn resources_in_registration_order(&self) -> Vec<Id> {
        self.resource_registration_order.lock().clone()
    }

    fn install_event(&self, event: Arc<Event>, owner: Id) -> Result<(), KilnError> {
        if self.events.contains_key(&event.id) {
            return Err(KilnError::DuplicateRegistration {
                kind: Kind::Event,
                id: event.id.to_string(),
            });
        }
        self.visibility.record_ownership(event.id.clone(), owner.clone());
        self.visibility.bubble_subtree_membership(&owner, &event.id);
        self.events.insert(event.id.clone(), event);
        Ok(())
    }

    fn install_hook(&self, hook: Arc<Hook>) -> Result<(), KilnError> {
        if self.hooks.contains_key(&hook.id) {
            return Err(KilnError::DuplicateRegistration {
                kind: Kind::Hook,
                id: hook.id.to_string(),
            });
        }
        self.hook_registration_order.lock().push(hook.id.clone());
        self.hooks.insert(hook.id.clone(), hook);
        Ok(())
    }

    /// Hooks in registration order, the tiebreaker an event-bus fan-out
    /// must apply after sorting by `order`.
    #[must_use]
    pub fn hooks_in_registration_order(&self) -> Vec<Arc<Hook>> {
        self.hook_registration_order
            .lock()
            .iter()
            .filter_map(|id| self.hooks.get(id).map(|h| Arc::clone(&h)))
            .collect()
    }

    fn install_task_middleware(&self, m: Arc<Middleware>) -> Result<(), KilnError> {
        if self.task_middleware.contains_key(&m.id) {
            return Err(KilnError::DuplicateRegistration {
                kind: Kind::TaskMiddleware,
                id: m.id.to_string(),
            });
        }
        self.task_middleware.insert(m.id.clone(), m);
        Ok(())
    }

    fn install_resource_middleware(&self, m: Arc<Middleware>) -> Result<(), KilnError> {
        if self.resource_middleware.contains_key(&m.id) {
            return Err(KilnError::DuplicateRegistration {
                kind: Kind::ResourceMiddleware,
                id: m.id.to_string(),
            });
        }
        self.resource_middleware.insert(m.id.clone(), m);
        Ok(())
    }

    fn install_tag(&self, tag: Tag) -> Result<(), KilnError> {
        if self.tags.contains_key(tag.id()) {
            return Err(KilnError::DuplicateRegistration {
                kind: Kind::Tag,
                id: tag.id().to_string(),
            });
        }
        self.tags.insert(tag.id().clone(), tag);
        Ok(())
    }

    /// Resolves every resource's (and task/hook/middleware's) `DepSpec`
    /// into a plain `{key -> Id}` map, now that every config is known.
    ///
    /// # Errors
    /// Returns [`KilnError::DependencyNotFound`] if a resolved dependency
    /// references an id that doesn't exist in any map.
    pub fn finalize(&self) -> Result<(), KilnError> {
        for entry in &self.resources {
            let resource_entry = entry.value();
            let config = &resource_entry.config;
            let resolved = self.resolve_deps(resource_entry.definition.dependencies.as_ref(), config, &entry.key().to_string())?;
            resource_entry.set_computed_dependencies(resolved);
        }
        for entry in &self.tasks {
            self.resolve_deps(entry.value().dependencies.as_ref(), &Value::Null, &entry.key().to_string())?;
        }
        for entry in &self.hooks {
            self.resolve_deps(entry.value().dependencies.as_ref(), &Value::Null, &entry.key().to_string())?;
        }
        Ok(())
    }

    fn resolve_deps(
        &self,
        spec: Option<&DepSpec>,
        config: &Value,
        consumer_id: &str,
    ) -> Result<IndexMap<String, Id>, KilnError> {
        let Some(spec) = spec else {
            return Ok(IndexMap::new());
        };
        let resolved = spec.resolve(config);
        for (_, target) in &resolved {
            if !self.contains_any(target) {
                return Err(KilnError::DependencyNotFound {
                    consumer_id: consumer_id.to_string(),
                    dependency_id: target.to_string(),
                });
            }
        }
        Ok(resolved)
    }

    /// Whether `id` resolves to any registered unit, regardless of kind.
    #[must_use]
    pub fn contains_any(&self, id: &Id) -> bool {
        self.tasks.contains_key(id)
        || self.resources.contains_key(id)
        || self.events.contains_key(id)
        || self.hooks.contains_key(id)
        || self.task_middleware.contains_key(id)
        || self.resource_middleware.contains_key(id)
        || self.tags.contains_key(id)
    }

    /// Looks up a task.
    ///
    /// # Errors
    /// Returns [`KilnError::TaskNotFound`] if absent.
    pub fn get_task(&self, id: &Id) -> Result<Arc<Task>, KilnError> {
        self.tasks
            .get(id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| KilnError::TaskNotFound { id: id.to_string() })
    }

    /// Looks up a resource entry.
    ///
    /// # Errors
    /// Returns [`KilnError::ResourceNotFound`] if absent.
    pub fn get_resource(&self, id: &Id) -> Result<Arc<ResourceEntry>, KilnError> {
        self.resources
            .get(id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| KilnError::ResourceNotFound { id: id.to_string() })
    }

    /// Looks up an event.
    ///
    /// # Errors
    /// Returns [`KilnError::EventNotFound`] if absent.
    pub fn get_event(&self, id: &Id) -> Result<Arc<Event>, KilnError> {
        self.events
            .get(id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| KilnError::EventNotFound { id: id.to_string() })
    }

    /// Looks up a tag.
    ///
    /// # Errors
    /// Returns [`KilnError::TagNotFound`] if absent.
    pub fn get_tag(&self, id: &Id) -> Result<Tag, KilnError> {
        self.tags
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| KilnError::TagNotFound { id: id.to_string() })
    }
}

/// A capability every consumer-facing engine (task runner, resource
/// initializer, event bus) needs but none of them should own: turning a
/// resolved `{key -> Id}` dependency map into the live [`Deps`] record a
/// unit's body actually receives. Implemented once, above `kiln-store`, by
/// whatever composes a live store with a task runner and event bus (see
/// `kiln-runtime`) — kept as a trait object here rather than a concrete
/// type to avoid a dependency cycle (`kiln-store` cannot depend on
/// `kiln-task`/`kiln-eventbus`, which both depend on `kiln-store`).
pub trait DepsResolver: Send + Sync {
    /// Resolves `spec` against `config` and looks up each entry's live
    /// [`kiln_definitions::DepValue`], producing the record the consumer's
    /// body receives.
    ///
    /// # Errors
    /// Returns [`KilnError::DependencyNotFound`] if any resolved id doesn't
    /// correspond to a resource/task/event the resolver knows about.
    fn resolve(&self, spec: Option<&DepSpec>, config: &Value) -> Result<Deps, KilnError>;
}

fn item_tag_ids(item: &Item) -> Vec<Id> {
    match item {
        Item::Task(t) => t.tags.iter().map(|a| a.tag_id().clone()).collect(),
        Item::Resource(r, _) => r.tags.iter().map(|a| a.tag_id().clone()).collect(),
        Item::Event(e) => e.tags.iter().map(|a| a.tag_id().clone()).collect(),
        Item::Hook(_) | Item::TaskMiddleware(_) | Item::ResourceMiddleware(_) | Item::Tag(_) => Vec::new(),
    }
}

/// Common prelude.
pub mod prelude {
    pub use crate::{DepsResolver, ResourceEntry, Store, VisibilityTracker};
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_definitions::Task as TaskDef;

    fn noop_resource(id: &str) -> Resource {
        Resource::new(id, |_cfg, _deps| {
            Box::pin(async { Ok(Arc::new(()) as kiln_definitions::DynValue) })
        })
    }

    #[test]
    fn builds_store_and_installs_lifecycle_events() {
        let task = Arc::new(TaskDef::new("t.double", |input, _deps| {
            Box::pin(async move {
                let n = input.as_i64().unwrap_or(0);
                Ok(serde_json::json!(n * 2))
            })
        }));
        let root = Arc::new(noop_resource("root").with_register(vec![Item::Task(task)]));
        let store = Store::build(root, Value::Null).unwrap();

        assert!(store.get_task(&Id::new("t.double")).is_ok());
        assert!(store.get_event(&Id::new("root.beforeInit")).is_ok());
        assert!(store.get_event(&Id::new("root.afterInit")).is_ok());
        assert!(store.get_event(&Id::new("root.onError")).is_ok());
    }

    #[test]
    fn duplicate_task_id_fails() {
        let t1 = Arc::new(TaskDef::new("dup", |i, _| Box::pin(async move { Ok(i) })));
        let t2 = Arc::new(TaskDef::new("dup", |i, _| Box::pin(async move { Ok(i) })));
        let root = Arc::new(noop_resource("root").with_register(vec![Item::Task(t1), Item::Task(t2)]));
        let err = Store::build(root, Value::Null).unwrap_err();
        assert!(matches!(err, KilnError::DuplicateRegistration { .. }));
    }

    #[test]
    fn subtree_and_ownership_are_tracked() {
        let task = Arc::new(TaskDef::new("child.task", |i, _| Box::pin(async move { Ok(i) })));
        let child = Arc::new(noop_resource("child").with_register(vec![Item::Task(task)]));
        let root = Arc::new(noop_resource("root").with_register(vec![Item::Resource(child, Some(Value::Null))]));
        let store = Store::build(root, Value::Null).unwrap();

        assert_eq!(store.visibility.owner_of(&Id::new("child")).unwrap(), Id::new("root"));
        assert_eq!(
            store.visibility.owner_of(&Id::new("child.task")).unwrap(),
            Id::new("child")
        );
        assert!(store.visibility.is_in_subtree(&Id::new("root"), &Id::new("child.task")));
    }
}
