//! [`Hook`] — a listener attached to one or more events.

use std::sync::Arc;

use kiln_core::Id;
use serde_json::Value;

use crate::dependencies::{BoxFuture, DepSpec, Deps};

/// What a hook's `on` field names: one event, several, or every event.
#[derive(Clone, Debug)]
pub enum EventTarget {
    /// A single event id.
    One(Id),
    /// Several event ids.
    Many(Vec<Id>),
    /// Every event (`"*"`).
    All,
}

impl EventTarget {
    /// Whether this target matches `event_id`.
    #[must_use]
    pub fn matches(&self, event_id: &Id) -> bool {
        match self {
            Self::One(id) => id == event_id,
            Self::Many(ids) => ids.contains(event_id),
            Self::All => true,
        }
    }

    /// The concrete event ids this target names, for graph-building
    /// purposes. `All` has no fixed set and is handled separately by the
    /// graph builder (it depends on every event registered, which isn't
    /// known until the whole store is finalized).
    #[must_use]
    pub fn explicit_ids(&self) -> Vec<Id> {
        match self {
            Self::One(id) => vec![id.clone()],
            Self::Many(ids) => ids.clone(),
            Self::All => Vec::new(),
        }
    }
}

/// The record a hook's `run` receives for a single firing of its event.
#[derive(Clone)]
pub struct Emission {
    /// The event id that fired.
    pub id: Id,
    /// The emitted payload.
    pub data: Value,
    /// Epoch-millis timestamp of the emission.
    pub timestamp: i64,
    /// An optional free-form source label (e.g. `"exposure:http"`).
    pub source: Option<String>,
}

/// A hook's `run` body.
pub type HookRunFn =
    Arc<dyn Fn(Emission, Deps) -> BoxFuture<'static, Result<(), kiln_error::KilnError>> + Send + Sync>;

/// A predicate deciding whether a hook should run for a given emission.
pub type HookFilter = Arc<dyn Fn(&Emission) -> bool + Send + Sync>;

/// A listener attached to one or more events.
#[derive(Clone)]
pub struct Hook {
    /// Unique id.
    pub id: Id,
    /// The event(s) this hook listens on.
    pub on: EventTarget,
    /// Scheduling order; ascending, ties break by registration order.
    pub order: i64,
    /// Optional predicate filtering which emissions actually invoke `run`.
    pub filter: Option<HookFilter>,
    /// Declared dependencies.
    pub dependencies: Option<DepSpec>,
    /// Event ids this hook's `run` body may itself emit, declared up front
    /// so the static emission-cycle check can see hook-chain cycles
    /// without running anything.
    pub emits: Vec<Id>,
    /// The hook body.
    pub run: HookRunFn,
}

impl Hook {
    /// Declares a new hook listening on `on`.
    pub fn new(
        id: impl Into<Id>,
        on: EventTarget,
        run: impl Fn(Emission, Deps) -> BoxFuture<'static, Result<(), kiln_error::KilnError>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            on,
            order: 0,
            filter: None,
            dependencies: None,
            emits: Vec::new(),
            run: Arc::new(run),
        }
    }

    /// Declares which events this hook's `run` body may itself emit.
    #[must_use]
    pub fn with_emits(mut self, emits: impl IntoIterator<Item = impl Into<Id>>) -> Self {
        self.emits = emits.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the scheduling order.
    #[must_use]
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Attaches a filter predicate.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&Emission) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Attaches a dependency spec.
    #[must_use]
    pub fn with_dependencies(mut self, deps: DepSpec) -> Self {
        self.dependencies = Some(deps);
        self
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("on", &self.on)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}
