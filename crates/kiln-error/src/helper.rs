//! The `defineError` unit kind: a typed, remediation-bearing error helper.
//!
//! ```ignore
//! let not_found = ErrorHelper::new("users.notFound", |data: &NotFoundData| {
//!     format!("user \"{}\" was not found", data.user_id)
//! })
//! .with_remediation(|data| format!("check that \"{}\" exists before calling this", data.user_id));
//!
//! // inside a task:
//! return Err(not_found.throw(NotFoundData { user_id: id }));
//!
//! // at a caller:
//! if not_found.is(&err) { ... }
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use kiln_core::{Id, TagAttachment};
use serde::Serialize;
use serde_json::Value;

/// Object-safe supertrait every [`ErrorHelperError`] implements, letting
/// callers hold a type-erased typed error (e.g. behind a task's `Result`)
/// and still have a helper's [`ErrorHelper::is`] recognize it.
pub trait AnyTypedError: std::error::Error + Send + Sync + 'static {
    /// Exposes `self` as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// The id of the [`ErrorHelper`] that produced this error.
    fn helper_id(&self) -> &Id;

    /// The error's serialized data payload, for wire transport.
    fn data_json(&self) -> Value;
}

/// The concrete error value a helper's [`ErrorHelper::throw`] produces.
#[derive(Debug, Clone)]
pub struct ErrorHelperError<D> {
    helper_id: Id,
    /// The typed payload passed to `throw`.
    pub data: D,
    message: String,
}

impl<D> ErrorHelperError<D> {
    /// The id of the helper that produced this error.
    #[must_use]
    pub fn helper_id(&self) -> &Id {
        &self.helper_id
    }
}

impl<D: fmt::Debug> fmt::Display for ErrorHelperError<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<D: fmt::Debug> std::error::Error for ErrorHelperError<D> {}

impl<D> AnyTypedError for ErrorHelperError<D>
where
    D: fmt::Debug + Serialize + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn helper_id(&self) -> &Id {
        &self.helper_id
    }

    fn data_json(&self) -> Value {
        serde_json::to_value(&self.data).unwrap_or(Value::Null)
    }
}

/// A `defineError` unit: formats, optionally remediates, recognizes, and
/// constructs a single typed error shape identified by `id`.
#[derive(Clone)]
pub struct ErrorHelper<D> {
    id: Id,
    format: Arc<dyn Fn(&D) -> String + Send + Sync>,
    remediation: Option<Arc<dyn Fn(&D) -> String + Send + Sync>>,
    tags: Vec<TagAttachment>,
    meta: Option<Value>,
}

impl<D> ErrorHelper<D>
where
    D: fmt::Debug + Serialize + Send + Sync + Clone + 'static,
{
    /// Declares a new error helper with its message formatter.
    pub fn new(id: impl Into<Id>, format: impl Fn(&D) -> String + Send + Sync + 'static) -> Self {
        Self {
            id: id.into(),
            format: Arc::new(format),
            remediation: None,
            tags: Vec::new(),
            meta: None,
        }
    }

    /// Attaches a remediation-string callback.
    #[must_use]
    pub fn with_remediation(
        mut self,
        remediation: impl Fn(&D) -> String + Send + Sync + 'static,
    ) -> Self {
        self.remediation = Some(Arc::new(remediation));
        self
    }

    /// Attaches tags to this helper.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<TagAttachment>) -> Self {
        self.tags = tags;
        self
    }

    /// Attaches free-form metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// The helper's id.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The tags attached to this helper.
    #[must_use]
    pub fn tags(&self) -> &[TagAttachment] {
        &self.tags
    }

    /// Formats the human-readable message for `data`.
    #[must_use]
    pub fn format(&self, data: &D) -> String {
        (self.format)(data)
    }

    /// Produces the remediation string for `data`, if this helper declares one.
    #[must_use]
    pub fn remediation(&self, data: &D) -> Option<String> {
        self.remediation.as_ref().map(|f| f(data))
    }

    /// Builds the concrete error value. Named `throw` (rather than `build`
    /// or `new_error`) to match the `defineError().throw(data)` call sites
    /// this was grounded on — callers write `return Err(helper.throw(data))`.
    #[must_use]
    pub fn throw(&self, data: D) -> ErrorHelperError<D> {
        let message = self.format(&data);
        ErrorHelperError {
            helper_id: self.id.clone(),
            data,
            message,
        }
    }

    /// Recognizes whether a type-erased error was produced by this helper.
    #[must_use]
    pub fn is(&self, err: &dyn AnyTypedError) -> bool {
        err.helper_id() == &self.id && err.as_any().downcast_ref::<ErrorHelperError<D>>().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct NotFoundData {
        user_id: String,
    }

    #[test]
    fn throw_then_is_round_trips() {
        let helper = ErrorHelper::new("users.notFound", |d: &NotFoundData| {
            format!("user \"{}\" not found", d.user_id)
        })
        .with_remediation(|d| format!("create \"{}\" first", d.user_id));

        let err = helper.throw(NotFoundData {
            user_id: "u1".into(),
        });
        assert_eq!(err.to_string(), "user \"u1\" not found");
        assert!(helper.is(&err));
        assert_eq!(helper.remediation(&err.data).unwrap(), "create \"u1\" first");
    }

    #[test]
    fn is_rejects_a_different_helpers_error() {
        let a = ErrorHelper::new("a", |d: &NotFoundData| d.user_id.clone());
        let b = ErrorHelper::new("b", |d: &NotFoundData| d.user_id.clone());
        let err = a.throw(NotFoundData {
            user_id: "x".into(),
        });
        assert!(a.is(&err));
        assert!(!b.is(&err));
    }
}
