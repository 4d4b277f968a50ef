//! Dependency declarations and their resolved runtime form.
//!
//! A unit's `dependencies` field is declared once, at definition time, as
//! either a fixed map of `{key -> Id}` or a factory that computes that map
//! from the unit's own config. [`DepSpec::resolve`] normalizes both
//! shapes to a plain [`indexmap::IndexMap`] once the config is known.
//!
//! The resolved map is just ids; [`Deps`] is the *runtime* record a
//! consumer actually receives once the store has looked each id up and
//! produced a [`DepValue`] for it.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use kiln_core::Id;
use kiln_error::KilnError;
use serde_json::Value;

/// A type-erased resource value, downcast by consumers via [`Deps::resource`].
pub type DynValue = Arc<dyn Any + Send + Sync>;

/// A boxed future, used throughout the definition closures instead of an
/// `async fn` in a trait (which would need `async_trait` for object safety).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A callable bound to one task id: invoking it runs that task with fresh
/// input, the same way a direct `runTask` call would.
pub type TaskInvoke = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, KilnError>> + Send + Sync>;

/// A callable bound to one event id: invoking it emits that event.
pub type EventEmit = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), KilnError>> + Send + Sync>;

/// The declared form of a unit's dependency map: either fixed, or computed
/// from the unit's own config once it is known.
#[derive(Clone)]
pub enum DepSpec {
    /// A fixed `{key -> Id}` map, known without needing the config.
    Fixed(IndexMap<String, Id>),
    /// A factory computing the map from config.
    Factory(Arc<dyn Fn(&Value) -> IndexMap<String, Id> + Send + Sync>),
}

impl DepSpec {
    /// Builds a fixed dependency map from `(key, id)` pairs.
    pub fn fixed(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<Id>)>) -> Self {
        Self::Fixed(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a config-driven dependency map.
    pub fn factory(f: impl Fn(&Value) -> IndexMap<String, Id> + Send + Sync + 'static) -> Self {
        Self::Factory(Arc::new(f))
    }

    /// Resolves this spec against a concrete config, producing the plain
    /// `{key -> Id}` map the store will look each entry up against.
    #[must_use]
    pub fn resolve(&self, config: &Value) -> IndexMap<String, Id> {
        match self {
            Self::Fixed(map) => map.clone(),
            Self::Factory(f) => f(config),
        }
    }
}

impl std::fmt::Debug for DepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(map) => f.debug_tuple("Fixed").field(map).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Merge semantics used when an `override()` patch or a deep fork rewrites
/// a dependency map: by default, keys in `patch` replace keys in `base`; a caller
/// asking for array-valued config fields to append instead of override
/// does so one level up, outside this map (ids don't have an "append" reading).
#[must_use]
pub fn merge_dependencies(
    base: &IndexMap<String, Id>,
    patch: &IndexMap<String, Id>,
) -> IndexMap<String, Id> {
    let mut merged = base.clone();
    for (key, id) in patch {
        merged.insert(key.clone(), id.clone());
    }
    merged
}

/// What a single resolved dependency key points to: a resource's live
/// value, a callable that invokes a task, or a callable that emits an
/// event.
#[derive(Clone)]
pub enum DepValue {
    /// A resource's initialized value.
    Resource(DynValue),
    /// An invocable reference to a task.
    Task(TaskInvoke),
    /// An invocable reference to an event.
    Event(EventEmit),
}

/// The runtime-resolved dependency record handed to a task's `run`, a
/// resource's `init`/`dispose`, a hook's `run`, or a middleware's `run`.
#[derive(Clone, Default)]
pub struct Deps {
    entries: IndexMap<String, DepValue>,
}

impl Deps {
    /// Builds a `Deps` record from already-resolved entries.
    #[must_use]
    pub fn new(entries: IndexMap<String, DepValue>) -> Self {
        Self { entries }
    }

    /// An empty dependency record, for units declaring no dependencies.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fetches and downcasts a resource dependency by key.
    ///
    /// # Errors
    /// Returns [`KilnError::DependencyNotFound`] if `key` is absent, or if
    /// present but not a resource value of type `T`.
    pub fn resource<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>, KilnError> {
        match self.entries.get(key) {
            Some(DepValue::Resource(value)) => {
                Arc::clone(value)
                    .downcast::<T>()
                    .map_err(|_| KilnError::DependencyNotFound {
                        consumer_id: String::new(),
                        dependency_id: key.to_string(),
                    })
            }
            _ => Err(KilnError::DependencyNotFound {
                consumer_id: String::new(),
                dependency_id: key.to_string(),
            }),
        }
    }

    /// Fetches a task dependency by key.
    ///
    /// # Errors
    /// Returns [`KilnError::DependencyNotFound`] if `key` is absent or not
    /// a task reference.
    pub fn task(&self, key: &str) -> Result<TaskInvoke, KilnError> {
        match self.entries.get(key) {
            Some(DepValue::Task(invoke)) => Ok(Arc::clone(invoke)),
            _ => Err(KilnError::DependencyNotFound {
                consumer_id: String::new(),
                dependency_id: key.to_string(),
            }),
        }
    }

    /// Fetches an event dependency by key.
    ///
    /// # Errors
    /// Returns [`KilnError::DependencyNotFound`] if `key` is absent or not
    /// an event reference.
    pub fn event(&self, key: &str) -> Result<EventEmit, KilnError> {
        match self.entries.get(key) {
            Some(DepValue::Event(emit)) => Ok(Arc::clone(emit)),
            _ => Err(KilnError::DependencyNotFound {
                consumer_id: String::new(),
                dependency_id: key.to_string(),
            }),
        }
    }
}

/// Namespace for the free functions dependency resolution needs beyond
/// what lives naturally on [`DepSpec`] — kept as a unit struct so call
/// sites read `Dependencies::merge(...)` the way a `Dependencies` helper
/// object would read elsewhere, even though Rust would happily let these
/// be bare functions.
pub struct Dependencies;

impl Dependencies {
    /// See [`merge_dependencies`].
    #[must_use]
    pub fn merge(base: &IndexMap<String, Id>, patch: &IndexMap<String, Id>) -> IndexMap<String, Id> {
        merge_dependencies(base, patch)
    }

    /// Resolves a [`DepSpec`] against `config`.
    #[must_use]
    pub fn resolve(spec: &DepSpec, config: &Value) -> IndexMap<String, Id> {
        spec.resolve(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_spec_resolves_regardless_of_config() {
        let spec = DepSpec::fixed([("db", Id::new("db")), ("cache", Id::new("cache"))]);
        let resolved = spec.resolve(&Value::Null);
        assert_eq!(resolved.get("db").unwrap().as_str(), "db");
    }

    #[test]
    fn factory_spec_reads_config() {
        let spec = DepSpec::factory(|cfg: &Value| {
            let mut map = IndexMap::new();
            if cfg.get("useCache").and_then(Value::as_bool) == Some(true) {
                map.insert("cache".to_string(), Id::new("cache"));
            }
            map
        });
        let resolved = spec.resolve(&serde_json::json!({"useCache": true}));
        assert!(resolved.contains_key("cache"));
        let resolved = spec.resolve(&serde_json::json!({"useCache": false}));
        assert!(!resolved.contains_key("cache"));
    }

    #[test]
    fn merge_overrides_by_key() {
        let base = DepSpec::fixed([("db", Id::new("db"))]).resolve(&Value::Null);
        let patch = DepSpec::fixed([("db", Id::new("mockDb")), ("cache", Id::new("cache"))])
            .resolve(&Value::Null);
        let merged = Dependencies::merge(&base, &patch);
        assert_eq!(merged.get("db").unwrap().as_str(), "mockDb");
        assert_eq!(merged.get("cache").unwrap().as_str(), "cache");
    }

    #[test]
    fn deps_resource_downcast_mismatch_is_dependency_not_found() {
        let mut entries = IndexMap::new();
        entries.insert(
            "db".to_string(),
            DepValue::Resource(Arc::new(42_i32) as DynValue),
        );
        let deps = Deps::new(entries);
        assert!(deps.resource::<i32>("db").is_ok());
        assert!(deps.resource::<String>("db").is_err());
        assert!(deps.resource::<i32>("missing").is_err());
    }
}
