//! # Kiln Definitions
//!
//! The immutable descriptors for every registerable unit: [`Task`],
//! [`Resource`], [`Event`], [`Hook`], [`Middleware`] (task- and
//! resource-flavored), plus the shared [`Dependencies`]/[`Deps`]/[`Schema`]
//! plumbing they all build on.
//!
//! Definitions carry no behavior beyond what their owner supplies — they are
//! plain data plus a handful of closures, matching 's "fluent builders are
//! sugar over plain definition records" design note. `kiln-store` is what
//! turns a tree of these into a running graph.

pub mod dependencies;
pub mod event;
pub mod hook;
pub mod middleware;
pub mod overlay;
pub mod resource;
pub mod schema;
pub mod task;

pub use dependencies::{DepSpec, Dependencies, Deps, DynValue};
pub use event::Event;
pub use hook::Hook;
pub use middleware::{Middleware, MiddlewareAttachment, MiddlewareKind};
pub use overlay::{override_event, override_hook, override_middleware, override_resource, override_task};
pub use resource::{AccessPolicy, Resource};
pub use schema::Schema;
pub use task::Task;

use kiln_core::Id;
use serde_json::Value;
use std::sync::Arc;

/// Any of the nine registerable unit kinds, or a resource paired with a
/// concrete config (`ResourceWithConfig`).
#[derive(Clone)]
pub enum Item {
    /// An invocable operation.
    Task(Arc<Task>),
    /// A lifecycle-managed value, along with the config it will be
    /// initialized with.
    Resource(Arc<Resource>, Option<Value>),
    /// A fan-out channel.
    Event(Arc<Event>),
    /// A listener attached to one or more events.
    Hook(Arc<Hook>),
    /// A task-flavored interceptor.
    TaskMiddleware(Arc<Middleware>),
    /// A resource-flavored interceptor.
    ResourceMiddleware(Arc<Middleware>),
    /// A typed label.
    Tag(kiln_core::Tag),
}

impl Item {
    /// The id of the wrapped unit.
    #[must_use]
    pub fn id(&self) -> Id {
        match self {
            Self::Task(t) => t.id.clone(),
            Self::Resource(r, _) => r.id.clone(),
            Self::Event(e) => e.id.clone(),
            Self::Hook(h) => h.id.clone(),
            Self::TaskMiddleware(m) | Self::ResourceMiddleware(m) => m.id.clone(),
            Self::Tag(t) => t.id().clone(),
        }
    }

    /// The unit kind, for store dispatch.
    #[must_use]
    pub fn kind(&self) -> kiln_core::Kind {
        match self {
            Self::Task(_) => kiln_core::Kind::Task,
            Self::Resource(..) => kiln_core::Kind::Resource,
            Self::Event(_) => kiln_core::Kind::Event,
            Self::Hook(_) => kiln_core::Kind::Hook,
            Self::TaskMiddleware(_) => kiln_core::Kind::TaskMiddleware,
            Self::ResourceMiddleware(_) => kiln_core::Kind::ResourceMiddleware,
            Self::Tag(_) => kiln_core::Kind::Tag,
        }
    }
}

/// Common prelude.
pub mod prelude {
    pub use crate::{
        override_event, override_hook, override_middleware, override_resource, override_task,
        AccessPolicy, DepSpec, Dependencies, Deps, DynValue, Event, Hook, Item, Middleware,
        MiddlewareAttachment, MiddlewareKind, Resource, Schema, Task,
    };
}
