//! [`Task`] — an invocable operation.

use std::sync::Arc;

use kiln_core::{Id, TagAttachment};
use serde_json::Value;

use crate::dependencies::{BoxFuture, DepSpec, Deps};
use crate::middleware::MiddlewareAttachment;
use crate::schema::Schema;

/// A task's `run` body: takes its validated input plus resolved
/// dependencies, produces a result (or fails).
pub type TaskRunFn = Arc<dyn Fn(Value, Deps) -> BoxFuture<'static, Result<Value, kiln_error::KilnError>> + Send + Sync>;

/// An invocable operation.
///
/// `run` is `None` exactly when [`Task::phantom`] is `true` — a phantom
/// task has no local implementation and fails fast unless a tunnel routes
/// it.
#[derive(Clone)]
pub struct Task {
    /// Unique id.
    pub id: Id,
    /// Free-form metadata.
    pub meta: Option<Value>,
    /// Tags attached to this task.
    pub tags: Vec<TagAttachment>,
    /// Declared dependencies.
    pub dependencies: Option<DepSpec>,
    /// Input validation schema.
    pub input_schema: Option<Schema>,
    /// Result validation schema.
    pub result_schema: Option<Schema>,
    /// Ids of error helpers this task may throw, for documentation/tunnel
    /// error-registry wiring.
    pub throws: Vec<Id>,
    /// Task-attached middleware, composed innermost after tag/global.
    pub middleware: Vec<MiddlewareAttachment>,
    /// The task body. `None` for phantom tasks.
    pub run: Option<TaskRunFn>,
    /// Whether this task has no local implementation.
    pub phantom: bool,
}

impl Task {
    /// Declares a task with a concrete `run` body (the common case).
    pub fn new(
        id: impl Into<Id>,
        run: impl Fn(Value, Deps) -> BoxFuture<'static, Result<Value, kiln_error::KilnError>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            meta: None,
            tags: Vec::new(),
            dependencies: None,
            input_schema: None,
            result_schema: None,
            throws: Vec::new(),
            middleware: Vec::new(),
            run: Some(Arc::new(run)),
            phantom: false,
        }
    }

    /// Declares a phantom task: one routed entirely through a tunnel.
    #[must_use]
    pub fn phantom(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            meta: None,
            tags: Vec::new(),
            dependencies: None,
            input_schema: None,
            result_schema: None,
            throws: Vec::new(),
            middleware: Vec::new(),
            run: None,
            phantom: true,
        }
    }

    /// Attaches a dependency spec.
    #[must_use]
    pub fn with_dependencies(mut self, deps: DepSpec) -> Self {
        self.dependencies = Some(deps);
        self
    }

    /// Attaches an input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Attaches a result schema.
    #[must_use]
    pub fn with_result_schema(mut self, schema: Schema) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// Attaches task middleware.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Vec<MiddlewareAttachment>) -> Self {
        self.middleware = middleware;
        self
    }

    /// Attaches tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<TagAttachment>) -> Self {
        self.tags = tags;
        self
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("phantom", &self.phantom)
            .finish_non_exhaustive()
    }
}
