//! Typed-error re-throw: a registry mapping
//! an [`ErrorHelper`]'s id to a closure that rebuilds its concrete
//! [`ErrorHelperError`] from the wire's `{ id, data }` pair, so a caller gets
//! back the same typed error a task raised rather than a generic
//! [`kiln_error::KilnError::Tunnel`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kiln_core::Id;
use kiln_error::helper::AnyTypedError;
use kiln_error::ErrorHelper;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

type Reconstructor = Arc<dyn Fn(Value) -> Option<Box<dyn AnyTypedError>> + Send + Sync>;

/// A registry of [`ErrorHelper`]s a [`crate::smart::SmartClient`] knows how
/// to reconstruct from a failed envelope's `error.id`/`error.data`.
#[derive(Clone, Default)]
pub struct ErrorRegistry {
    reconstructors: HashMap<Id, Reconstructor>,
}

impl ErrorRegistry {
    /// An empty registry; every server error surfaces as a generic
    /// [`kiln_error::KilnError::Tunnel`] until helpers are registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `helper` so its errors round-trip over the wire.
    #[must_use]
    pub fn with_helper<D>(mut self, helper: &ErrorHelper<D>) -> Self
    where
        D: fmt::Debug + Serialize + DeserializeOwned + Send + Sync + Clone + 'static,
    {
        let helper = helper.clone();
        self.reconstructors.insert(
            helper.id().clone(),
            Arc::new(move |data: Value| {
                serde_json::from_value::<D>(data).ok().map(|d| Box::new(helper.throw(d)) as Box<dyn AnyTypedError>)
            }),
        );
        self
    }

    /// Rebuilds the typed error registered under `id`, if one exists and
    /// `data` deserializes to its payload type.
    #[must_use]
    pub fn reconstruct(&self, id: &str, data: Value) -> Option<Box<dyn AnyTypedError>> {
        self.reconstructors.get(id).and_then(|f| f(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct NotFoundData {
        user_id: String,
    }

    #[test]
    fn reconstructs_a_registered_helper() {
        let helper = ErrorHelper::new("users.notFound", |d: &NotFoundData| format!("no user {}", d.user_id));
        let registry = ErrorRegistry::new().with_helper(&helper);

        let rebuilt = registry
            .reconstruct("users.notFound", serde_json::json!({ "user_id": "u1" }))
            .expect("helper was registered");
        assert!(helper.is(rebuilt.as_ref()));
    }

    #[test]
    fn unregistered_id_reconstructs_to_none() {
        let registry = ErrorRegistry::new();
        assert!(registry.reconstruct("unknown", Value::Null).is_none());
    }
}
