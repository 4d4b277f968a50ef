use std::fmt;

/// The tag distinguishing the nine unit variants the store can hold.
///
/// Definitions are modeled as a flat tagged sum rather than a class
/// hierarchy: a `Kind` plus small capability traits (`HasId`, `HasTags`, ...)
/// covers every place the core needs to branch on what a unit is, without
/// forcing every unit through a common supertype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// An invocable operation.
    Task,
    /// A lifecycle-managed value.
    Resource,
    /// A fan-out channel.
    Event,
    /// A listener attached to one or more events.
    Hook,
    /// An interceptor wrapping task invocation.
    TaskMiddleware,
    /// An interceptor wrapping resource initialization.
    ResourceMiddleware,
    /// A typed label attachable to other units.
    Tag,
    /// A typed, remediation-bearing error helper.
    Error,
    /// A per-invocation propagated value.
    AsyncContext,
}

impl Kind {
    /// Human-readable noun used in error messages (`"task"`, `"resource"`, ...).
    #[must_use]
    pub const fn noun(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Resource => "resource",
            Self::Event => "event",
            Self::Hook => "hook",
            Self::TaskMiddleware => "task middleware",
            Self::ResourceMiddleware => "resource middleware",
            Self::Tag => "tag",
            Self::Error => "error",
            Self::AsyncContext => "async context",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}
