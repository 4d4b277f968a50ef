//! `override(def, patch)`: replaces a definition's fields with a
//! same-shape patch while pinning the result to the original's id, so the
//! shadow definition registers under the id the original would have and
//! wins during registration.
//!
//! Typed per kind rather than one untyped `patch: Value` function — each
//! kind's fields (and the builders that set them) differ, so a generic
//! patch would need to re-derive the same match the caller already wrote
//! with `Task::new(...).with_foo(...)`.

use crate::event::Event;
use crate::hook::Hook;
use crate::middleware::Middleware;
use crate::resource::Resource;
use crate::task::Task;

/// Overrides `original` with `patch`, keeping `original`'s id.
#[must_use]
pub fn override_task(original: &Task, mut patch: Task) -> Task {
    patch.id = original.id.clone();
    patch
}

/// Overrides `original` with `patch`, keeping `original`'s id.
#[must_use]
pub fn override_resource(original: &Resource, mut patch: Resource) -> Resource {
    patch.id = original.id.clone();
    patch
}

/// Overrides `original` with `patch`, keeping `original`'s id.
#[must_use]
pub fn override_event(original: &Event, mut patch: Event) -> Event {
    patch.id = original.id.clone();
    patch
}

/// Overrides `original` with `patch`, keeping `original`'s id.
#[must_use]
pub fn override_hook(original: &Hook, mut patch: Hook) -> Hook {
    patch.id = original.id.clone();
    patch
}

/// Overrides `original` with `patch`, keeping `original`'s id.
#[must_use]
pub fn override_middleware(original: &Middleware, mut patch: Middleware) -> Middleware {
    patch.id = original.id.clone();
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencies::DynValue;
    use std::sync::Arc;

    #[test]
    fn override_task_keeps_original_id() {
        let original = Task::new("users.create", |i, _d| Box::pin(async move { Ok(i) }));
        let patch = Task::new("unused-id", |_i, _d| Box::pin(async move { Ok(serde_json::json!("mocked")) }));
        let overridden = override_task(&original, patch);
        assert_eq!(overridden.id.as_str(), "users.create");
    }

    #[test]
    fn override_resource_keeps_original_id() {
        let original = Resource::new("db", |_c, _d| Box::pin(async { Ok(Arc::new(()) as DynValue) }));
        let patch = Resource::new("mock-db", |_c, _d| Box::pin(async { Ok(Arc::new(42_i32) as DynValue) }));
        let overridden = override_resource(&original, patch);
        assert_eq!(overridden.id.as_str(), "db");
    }
}
