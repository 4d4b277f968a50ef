//! Runtime-lifecycle bookkeeping attached to a registered resource.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use indexmap::IndexMap;
use kiln_core::Id;
use kiln_definitions::{DynValue, Resource};
use parking_lot::RwLock;
use serde_json::Value;

/// A registered resource plus the mutable lifecycle state the initializer
/// writes exactly once on init and once on dispose.
pub struct ResourceEntry {
    /// The resource's static definition.
    pub definition: Arc<Resource>,
    /// The config this instance was registered with.
    pub config: Value,
    /// The resolved `{key -> Id}` dependency map, filled in during
    /// finalization.
    pub computed_dependencies: RwLock<Option<IndexMap<String, Id>>>,
    /// The initialized value, once `init` has succeeded. Cleared on
    /// dispose.
    pub value: ArcSwapOption<dyn std::any::Any + Send + Sync>,
    /// Whether `init` has completed successfully.
    pub is_initialized: AtomicBool,
}

impl ResourceEntry {
    /// Wraps a resource definition with fresh (uninitialized) lifecycle
    /// state.
    #[must_use]
    pub fn new(definition: Arc<Resource>, config: Value) -> Self {
        Self {
            definition,
            config,
            computed_dependencies: RwLock::new(None),
            value: ArcSwapOption::empty(),
            is_initialized: AtomicBool::new(false),
        }
    }

    /// Records the init result: stores the value, marks initialized.
    pub fn mark_initialized(&self, value: DynValue) {
        self.value.store(Some(value));
        self.is_initialized.store(true, Ordering::Release);
    }

    /// Clears lifecycle state after dispose.
    pub fn clear(&self) {
        self.value.store(None);
        self.is_initialized.store(false, Ordering::Release);
        *self.computed_dependencies.write() = None;
    }

    /// Whether `init` has completed successfully.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.is_initialized.load(Ordering::Acquire)
    }

    /// The live value, if initialized.
    #[must_use]
    pub fn value(&self) -> Option<DynValue> {
        self.value.load_full()
    }

    /// Records the resolved dependency map.
    pub fn set_computed_dependencies(&self, deps: IndexMap<String, Id>) {
        *self.computed_dependencies.write() = Some(deps);
    }

    /// The resolved dependency map, if finalization has run.
    #[must_use]
    pub fn computed_dependencies(&self) -> Option<IndexMap<String, Id>> {
        self.computed_dependencies.read().clone()
    }
}
