//! [`Resource`] — a lifecycle-managed value.

use std::sync::Arc;

use kiln_core::{Id, TagAttachment};
use kiln_error::KilnError;
use serde_json::Value;

use crate::dependencies::{BoxFuture, DepSpec, Deps, DynValue};
use crate::event::{lifecycle_events, Event};
use crate::middleware::MiddlewareAttachment;
use crate::schema::Schema;
use crate::Item;

/// A resource's `init` body.
pub type ResourceInitFn =
    Arc<dyn Fn(Value, Deps) -> BoxFuture<'static, Result<DynValue, KilnError>> + Send + Sync>;

/// A resource's `dispose` body.
pub type ResourceDisposeFn =
    Arc<dyn Fn(DynValue, Value, Deps) -> BoxFuture<'static, Result<(), KilnError>> + Send + Sync>;

/// A resource's `register` field: either a fixed list of child items, or a
/// factory computing that list from the resource's own config.
#[derive(Clone)]
pub enum RegisterSpec {
    /// A fixed child-item list.
    Items(Vec<Item>),
    /// A factory computing child items from config.
    Factory(Arc<dyn Fn(&Value) -> Vec<Item> + Send + Sync>),
}

impl RegisterSpec {
    /// Resolves this spec against a concrete config.
    #[must_use]
    pub fn resolve(&self, config: &Value) -> Vec<Item> {
        match self {
            Self::Items(items) => items.clone(),
            Self::Factory(f) => f(config),
        }
    }
}

/// `dependencyAccessPolicy.deny`: ids and/or tag ids this resource's
/// subtree cannot reach, regardless of export visibility.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    /// Denied unit ids.
    pub deny_ids: Vec<Id>,
    /// Denied tag ids — any unit carrying one of these tags is denied.
    pub deny_tags: Vec<Id>,
}

impl AccessPolicy {
    /// Builds a deny policy from plain ids.
    #[must_use]
    pub fn deny_ids(ids: impl IntoIterator<Item = impl Into<Id>>) -> Self {
        Self {
            deny_ids: ids.into_iter().map(Into::into).collect(),
            deny_tags: Vec::new(),
        }
    }

    /// Adds denied tag ids to this policy.
    #[must_use]
    pub fn with_deny_tags(mut self, tags: impl IntoIterator<Item = impl Into<Id>>) -> Self {
        self.deny_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A lifecycle-managed value.
#[derive(Clone)]
pub struct Resource {
    /// Unique id.
    pub id: Id,
    /// Free-form metadata.
    pub meta: Option<Value>,
    /// Tags attached to this resource.
    pub tags: Vec<TagAttachment>,
    /// Config validation schema.
    pub config_schema: Option<Schema>,
    /// Child items registered by this resource, directly or via factory.
    pub register: Option<RegisterSpec>,
    /// Resource-flavored middleware attached to this resource's `init`.
    pub middleware: Vec<MiddlewareAttachment>,
    /// Declared dependencies.
    pub dependencies: Option<DepSpec>,
    /// Explicit export allowlist. `None` means "everything in
    /// this subtree is visible to outside consumers" (no export boundary).
    pub exports: Option<Vec<Id>>,
    /// Access policy denying specific ids/tags regardless of visibility.
    pub dependency_access_policy: Option<AccessPolicy>,
    /// The init body.
    pub init: ResourceInitFn,
    /// The dispose body, if any.
    pub dispose: Option<ResourceDisposeFn>,
}

impl Resource {
    /// Declares a new resource with a concrete `init` body.
    pub fn new(
        id: impl Into<Id>,
        init: impl Fn(Value, Deps) -> BoxFuture<'static, Result<DynValue, KilnError>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            meta: None,
            tags: Vec::new(),
            config_schema: None,
            register: None,
            middleware: Vec::new(),
            dependencies: None,
            exports: None,
            dependency_access_policy: None,
            init: Arc::new(init),
            dispose: None,
        }
    }

    /// Attaches a fixed list of child items.
    #[must_use]
    pub fn with_register(mut self, items: Vec<Item>) -> Self {
        self.register = Some(RegisterSpec::Items(items));
        self
    }

    /// Attaches a config-driven child-item factory.
    #[must_use]
    pub fn with_register_factory(mut self, f: impl Fn(&Value) -> Vec<Item> + Send + Sync + 'static) -> Self {
        self.register = Some(RegisterSpec::Factory(Arc::new(f)));
        self
    }

    /// Attaches a dispose body.
    #[must_use]
    pub fn with_dispose(
        mut self,
        dispose: impl Fn(DynValue, Value, Deps) -> BoxFuture<'static, Result<(), KilnError>> + Send + Sync + 'static,
    ) -> Self {
        self.dispose = Some(Arc::new(dispose));
        self
    }

    /// Declares the export allowlist.
    #[must_use]
    pub fn with_exports(mut self, ids: impl IntoIterator<Item = impl Into<Id>>) -> Self {
        self.exports = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Declares a dependency access policy.
    #[must_use]
    pub fn with_access_policy(mut self, policy: AccessPolicy) -> Self {
        self.dependency_access_policy = Some(policy);
        self
    }

    /// Attaches resource middleware.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Vec<MiddlewareAttachment>) -> Self {
        self.middleware = middleware;
        self
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

    /// Attaches tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<TagAttachment>) -> Self {
        self.tags = tags;
        self
    }

    /// The auto-generated `beforeInit`/`afterInit`/`onError` events for this
    /// resource.
    #[must_use]
    pub fn lifecycle_events(&self) -> [Event; 3] {
        lifecycle_events(&self.id)
    }

    /// This resource's `{id}.beforeInit` event id.
    #[must_use]
    pub fn before_init_event_id(&self) -> Id {
        Id::new(format!("{}.beforeInit", self.id))
    }

    /// This resource's `{id}.afterInit` event id.
    #[must_use]
    pub fn after_init_event_id(&self) -> Id {
        Id::new(format!("{}.afterInit", self.id))
    }

    /// This resource's `{id}.onError` event id.
    #[must_use]
    pub fn on_error_event_id(&self) -> Id {
        Id::new(format!("{}.onError", self.id))
    }

    /// Deep/shallow-forks this resource's registration subtree under a new
    /// id. `reId` remaps each child id;
    /// references pointing *inside* the subtree are rewritten to the
    /// remapped id, references to outside targets are left unchanged.
    ///
    /// Only `Items`-form registers can be forked directly: a `Factory`-form
    /// register is resolved against `config` first, then the result is
    /// forked the same way.
    #[must_use]
    pub fn fork(
        &self,
        new_id: impl Into<Id>,
        config: &Value,
        deep: bool,
        re_id: &dyn Fn(&Id) -> Id,
    ) -> Self {
        let mut forked = self.clone();
        forked.id = new_id.into();

        if deep {
            if let Some(register) = &self.register {
                let items = register.resolve(config);
                let remapped: Vec<Item> = items.into_iter().map(|item| remap_item(item, re_id)).collect();
                forked.register = Some(RegisterSpec::Items(remapped));
            }
            if let Some(exports) = &self.exports {
                forked.exports = Some(exports.iter().map(re_id).collect());
            }
        }

        forked
    }
}

fn remap_item(item: Item, re_id: &dyn Fn(&Id) -> Id) -> Item {
    match item {
        Item::Task(task) => {
            let mut t = (*task).clone();
            t.id = re_id(&t.id);
            Item::Task(Arc::new(t))
        }
        Item::Resource(resource, config) => {
            let new_id = re_id(&resource.id);
            let forked = resource.fork(new_id, config.as_ref().unwrap_or(&Value::Null), true, re_id);
            Item::Resource(Arc::new(forked), config)
        }
        Item::Event(event) => {
            let mut e = (*event).clone();
            e.id = re_id(&e.id);
            Item::Event(Arc::new(e))
        }
        Item::Hook(hook) => {
            let mut h = (*hook).clone();
            h.id = re_id(&h.id);
            Item::Hook(Arc::new(h))
        }
        Item::TaskMiddleware(m) => {
            let mut mw = (*m).clone();
            mw.id = re_id(&mw.id);
            Item::TaskMiddleware(Arc::new(mw))
        }
        Item::ResourceMiddleware(m) => {
            let mut mw = (*m).clone();
            mw.id = re_id(&mw.id);
            Item::ResourceMiddleware(Arc::new(mw))
        }
        Item::Tag(tag) => Item::Tag(tag),
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_remaps_child_ids_but_not_external_refs() {
        let child = Arc::new(crate::task::Task::new("child", |input, _deps| {
            Box::pin(async move { Ok(input) })
        }));
        let root = Resource::new("root", |_cfg, _deps| Box::pin(async { Ok(Arc::new(()) as DynValue) }))
            .with_register(vec![Item::Task(child)])
            .with_exports(["child"]);

        let forked = root.fork("root2", &Value::Null, true, &|id| Id::new(format!("{id}-fork")));
        assert_eq!(forked.id.as_str(), "root2");
        let RegisterSpec::Items(items) = forked.register.unwrap() else {
            panic!("expected items")
        };
        assert_eq!(items[0].id().as_str(), "child-fork");
        assert_eq!(
            forked.exports.unwrap(),
            vec![Id::new("child-fork")]
        );
    }
}
