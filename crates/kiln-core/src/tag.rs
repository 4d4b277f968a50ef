use std::sync::Arc;

use serde_json::Value;

use crate::id::Id;

/// The well-known tag id marking a resource as a tunnel. Shared between `kiln-task` (phantom routing),
/// `kiln-exposure` (allow-list discovery), and `kiln-client` rather than
/// re-declared as a string literal in each.
pub const TUNNEL_TAG_ID: &str = "globals.tags.tunnel";

/// The [`Id`] form of [`TUNNEL_TAG_ID`].
#[must_use]
pub fn tunnel_tag_id() -> Id {
    Id::new(TUNNEL_TAG_ID)
}

/// A typed label definitions can carry. `Tag<T>` is typed at the call site
/// through [`Tag::with`], which produces a [`TagAttachment`] recording the
/// tag's id alongside an opaque config payload; the store matches
/// attachments back to tags purely by id.
#[derive(Clone)]
pub struct Tag {
    id: Id,
}

impl Tag {
    /// Declares a new tag with the given id.
    pub fn new(id: impl Into<Id>) -> Self {
        Self { id: id.into() }
    }

    /// The tag's id.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Produces an attachment binding this tag (with an optional config
    /// payload) to whatever definition calls `.with(...)`.
    #[must_use]
    pub fn with(&self, config: impl Into<Value>) -> TagAttachment {
        TagAttachment {
            tag_id: self.id.clone(),
            config: Some(Arc::new(config.into())),
        }
    }

    /// Produces a bare attachment carrying no config.
    #[must_use]
    pub fn attach(&self) -> TagAttachment {
        TagAttachment {
            tag_id: self.id.clone(),
            config: None,
        }
    }
}

/// A tag bound to a particular definition, optionally carrying a config
/// payload supplied through [`Tag::with`].
#[derive(Clone)]
pub struct TagAttachment {
    tag_id: Id,
    config: Option<Arc<Value>>,
}

impl TagAttachment {
    /// The id of the tag this attachment refers to.
    #[must_use]
    pub fn tag_id(&self) -> &Id {
        &self.tag_id
    }

    /// The attachment's config payload, if any.
    #[must_use]
    pub fn config(&self) -> Option<&Value> {
        self.config.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_carries_config_attach_does_not() {
        let tunnel = Tag::new("globals.tags.tunnel");
        let a = tunnel.with(serde_json::json!({"mode": "server"}));
        let b = tunnel.attach();
        assert_eq!(a.tag_id().as_str(), "globals.tags.tunnel");
        assert!(a.config().is_some());
        assert!(b.config().is_none());
    }
}
