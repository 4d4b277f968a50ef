//! [`Event`] — a typed fan-out channel.

use kiln_core::{Id, TagAttachment};
use serde_json::Value;

use crate::schema::Schema;

/// A fan-out channel. Events carry no behavior of their own; hooks
/// subscribe to them and `EventManager::emit` does the fan-out.
#[derive(Clone)]
pub struct Event {
    /// Unique id.
    pub id: Id,
    /// Free-form metadata.
    pub meta: Option<Value>,
    /// Tags attached to this event.
    pub tags: Vec<TagAttachment>,
    /// Payload validation schema.
    pub schema: Option<Schema>,
    /// Ids of error helpers a hook of this event may throw.
    pub throws: Vec<Id>,
}

impl Event {
    /// Declares a new event.
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            meta: None,
            tags: Vec::new(),
            schema: None,
            throws: Vec::new(),
        }
    }

    /// Attaches a payload schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Attaches tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<TagAttachment>) -> Self {
        self.tags = tags;
        self
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("id", &self.id).finish_non_exhaustive()
    }
}

/// The per-resource auto-generated lifecycle events: every
/// [`crate::resource::Resource`] gets a `{id}.beforeInit`, `{id}.afterInit`,
/// and `{id}.onError` event installed alongside it at registration time.
#[must_use]
pub fn lifecycle_events(resource_id: &Id) -> [Event; 3] {
    [
        Event::new(format!("{resource_id}.beforeInit")),
        Event::new(format!("{resource_id}.afterInit")),
        Event::new(format!("{resource_id}.onError")),
    ]
}
