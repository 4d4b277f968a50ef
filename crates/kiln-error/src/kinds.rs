//! The closed taxonomy of errors the runtime itself can raise.
//!
//! One flat enum rather than one type per category: every arm still carries
//! its own remediation text via [`KilnError::remediation`], so grouping by
//! category only matters for documentation (see the table in this module).

use kiln_core::Kind;
use thiserror::Error;

/// Registration-time errors.
#[derive(Debug, Error, Clone)]
pub enum KilnError {
    // ---- Registration ----------------------------------------------------
    /// The same id was registered twice under the same kind.
    #[error("duplicate registration: a {kind} with id \"{id}\" is already registered")]
    DuplicateRegistration {
        /// The kind of unit that collided.
        kind: Kind,
        /// The id both registrations share.
        id: String,
    },

    /// A registerable item did not match any known unit kind.
    #[error("unknown item type encountered while registering \"{id}\"")]
    UnknownItemType {
        /// The id of the offending item, if one could be recovered.
        id: String,
    },

    /// A declared dependency key does not resolve to a registered unit.
    #[error("dependency \"{dependency_id}\" declared by \"{consumer_id}\" was not found")]
    DependencyNotFound {
        /// The unit that declared the dependency.
        consumer_id: String,
        /// The id that failed to resolve.
        dependency_id: String,
    },

    /// `getResource` (or an internal lookup) targeted an id that is not a resource.
    #[error("resource \"{id}\" was not found")]
    ResourceNotFound {
        /// The missing id.
        id: String,
    },

    /// `getTask` targeted an id that is not a task.
    #[error("task \"{id}\" was not found")]
    TaskNotFound {
        /// The missing id.
        id: String,
    },

    /// An event lookup targeted an id that is not an event.
    #[error("event \"{id}\" was not found")]
    EventNotFound {
        /// The missing id.
        id: String,
    },

    /// A tag lookup targeted an id that is not a tag.
    #[error("tag \"{id}\" was not found")]
    TagNotFound {
        /// The missing id.
        id: String,
    },

    /// A middleware attachment referenced an id with no registered middleware.
    #[error("middleware \"{id}\" is not registered")]
    MiddlewareNotRegistered {
        /// The missing id.
        id: String,
    },

    // ---- Graph -------------------------------------------------------------
    /// The dependency graph contains at least one cycle.
    #[error("circular dependency detected: {}", path.join(" -> "))]
    CircularDependencies {
        /// A path that walks through at least one member of every offending cycle.
        path: Vec<String>,
        /// Whether a middleware id participates in the cycle (adds remediation text).
        involves_middleware: bool,
    },

    /// A set of hooks forms a cycle through the events they emit.
    #[error("event emission cycle detected: {}", path.join(" -> "))]
    EventEmissionCycle {
        /// The cyclical chain of event ids.
        path: Vec<String>,
    },

    /// A single emission re-entered an event already on its own emission path.
    #[error("event \"{event_id}\" was emitted re-entrantly from within its own emission chain: {}", path.join(" -> "))]
    EventCycle {
        /// The event id that re-entered.
        event_id: String,
        /// The chain of event ids currently on the emission stack.
        path: Vec<String>,
    },

    // ---- Visibility ---------------------------------------------------------
    /// A consumer tried to reach a target hidden by an owner's export set.
    #[error("\"{consumer_id}\" cannot see \"{target_id}\": not exported by \"{gating_owner_id}\"")]
    VisibilityViolation {
        /// The unit attempting the access.
        consumer_id: String,
        /// The unit it tried to reach.
        target_id: String,
        /// The ancestor resource whose export set failed to include the target.
        gating_owner_id: String,
        /// The export set that was consulted, for remediation messaging.
        export_set: Vec<String>,
    },

    /// An ancestor's `dependencyAccessPolicy.deny` rule matched the target.
    #[error("\"{consumer_id}\" is denied access to \"{target_id}\" by a policy on \"{policy_owner_id}\"")]
    DependencyAccessPolicyViolation {
        /// The unit attempting the access.
        consumer_id: String,
        /// The unit it tried to reach.
        target_id: String,
        /// The ancestor resource whose policy matched.
        policy_owner_id: String,
        /// The deny rule that matched (an id or a tag id).
        matched_rule: String,
    },

    // ---- Validation -----------------------------------------------------
    /// A schema `.parse()` call failed.
    #[error("{subject} validation failed for \"{unit_id}\": {cause}")]
    Validation {
        /// One of `"Task input"`, `"Task result"`, `"Resource config"`,
        /// `"Event payload"`, `"Middleware config"`.
        subject: &'static str,
        /// The unit whose schema rejected the value.
        unit_id: String,
        /// The underlying parse failure message.
        cause: String,
    },

    // ---- Lifecycle -------------------------------------------------------
    /// `run()` was called on a store that had already completed initialization.
    #[error("store has already been initialized")]
    StoreAlreadyInitialized,

    /// An operation requiring an unlocked store ran after the store locked.
    #[error("store is locked: registration is only allowed before run()")]
    Locked,

    /// A parallel init layer could not be scheduled consistently.
    #[error("parallel initialization scheduling failed: {reason}")]
    ParallelInitScheduling {
        /// Why the layer couldn't be scheduled.
        reason: String,
    },

    /// A durable-workflow journal saw the same idempotency key twice.
    #[error("journal already has an entry for key \"{key}\"")]
    JournalDuplicateKey {
        /// The duplicated key.
        key: String,
    },

    /// One or more resources failed to dispose; collects every failure
    /// rather than stopping at the first.
    #[error("{} resource(s) failed to dispose: {}", errors.len(), errors.join("; "))]
    ResourceDisposalFailures {
        /// Every dispose failure's message, in reverse-init (dispose) order.
        errors: Vec<String>,
    },

    // ---- Concurrency ------------------------------------------------------
    /// An invocation observed its cancellation signal fire.
    #[error("operation was cancelled")]
    Cancellation,

    /// A queue job was dropped because the queue was disposed.
    #[error("queue was disposed")]
    QueueDisposed,

    /// A queue's in-flight job transitively depends on a job still queued
    /// behind it, so the queue can never drain.
    #[error("queue deadlock: in-flight job depends on work queued behind it")]
    QueueDeadlock,

    /// `Semaphore::new` was given zero permits.
    #[error("semaphore must be constructed with at least one permit")]
    SemaphoreInvalidPermits,

    /// `Semaphore::new` was given a non-integer permit count.
    #[error("semaphore permit count must be an integer")]
    SemaphoreNonIntegerPermits,

    /// A waiter's acquire was rejected because the semaphore was disposed.
    #[error("semaphore was disposed")]
    SemaphoreDisposed,

    /// A waiter's acquire exceeded its configured timeout.
    #[error("semaphore acquire timed out")]
    SemaphoreAcquireTimeout,

    // ---- Platform -----------------------------------------------------
    /// The host platform does not implement a capability the runtime needs.
    #[error("platform does not support: {function}")]
    PlatformUnsupportedFunction {
        /// The capability that is missing (e.g. `"async context propagation"`).
        function: String,
    },

    /// The platform abstraction is entirely unavailable.
    #[error("platform is unreachable")]
    PlatformUnreachable,

    /// A task runner was required but none was configured on the store.
    #[error("no task runner is set on this store")]
    TaskRunnerNotSet,

    // ---- Tunnel / HTTP --------------------------------------------------
    /// A phantom task had no routing tunnel available.
    #[error("phantom task \"{task_id}\" has no routing tunnel")]
    PhantomTaskNotRouted {
        /// The phantom task's id.
        task_id: String,
    },

    /// An HTTP-backed tunnel was constructed without a base URL.
    #[error("an HTTP base URL is required for this tunnel")]
    HttpBaseUrlRequired,

    /// An exposure server was built with neither a token nor an explicit
    /// opt-in to unauthenticated access.
    #[error("exposure server requires a token unless allow_anonymous or dangerously_allow_open_exposure is set")]
    ExposureMissingToken,

    /// An async context value failed to serialize for the `x-runner-context` header.
    #[error("failed to serialize async context \"{context_id}\": {cause}")]
    HttpContextSerialization {
        /// The context id that failed to serialize.
        context_id: String,
        /// The underlying serialization error.
        cause: String,
    },

    /// The generic wire-level error returned by a tunnel peer or raised locally
    /// while processing a tunnel request/response.
    #[error("tunnel error [{code}]: {message}")]
    Tunnel {
        /// One of the fixed tunnel error codes (see [`TunnelErrorCode`]).
        code: TunnelErrorCode,
        /// Human-readable message.
        message: String,
        /// The HTTP status this maps to, if the transport is HTTP.
        http_code: Option<u16>,
        /// A registered error helper id, when this wraps a typed domain error.
        id: Option<String>,
        /// The typed error's data payload, when `id` is set.
        data: Option<serde_json::Value>,
    },
}

/// The fixed set of tunnel/HTTP error codes from /.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelErrorCode {
    /// Generic non-2xx HTTP response with no structured envelope.
    HttpError,
    /// The request exceeded its configured timeout.
    RequestTimeout,
    /// The response body could not be parsed as a protocol envelope.
    InvalidResponse,
    /// Missing or invalid bearer token.
    Unauthorized,
    /// Unknown task/event id.
    NotFound,
    /// Id exists but is outside the tunnel allow-list.
    Forbidden,
    /// An internal (typed or generic) error occurred while running the unit.
    InternalError,
    /// The HTTP method used was not POST.
    MethodNotAllowed,
    /// The request body was not valid JSON.
    InvalidJson,
    /// The multipart body was malformed.
    InvalidMultipart,
    /// The multipart body was missing its `__manifest` part.
    MissingManifest,
    /// A sentinel in the manifest had no matching `file:{id}` part.
    MissingFilePart,
    /// The client disconnected before a response could be sent.
    RequestAborted,
}

impl TunnelErrorCode {
    /// The wire string used in the JSON envelope's `error.code` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HttpError => "HTTP_ERROR",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::InternalError => "INTERNAL_ERROR",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::InvalidJson => "INVALID_JSON",
            Self::InvalidMultipart => "INVALID_MULTIPART",
            Self::MissingManifest => "MISSING_MANIFEST",
            Self::MissingFilePart => "MISSING_FILE_PART",
            Self::RequestAborted => "REQUEST_ABORTED",
        }
    }

    /// Parses a wire code string back into a [`TunnelErrorCode`], falling
    /// back to [`Self::HttpError`] for anything unrecognized.
    #[must_use]
    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "REQUEST_TIMEOUT" => Self::RequestTimeout,
            "INVALID_RESPONSE" => Self::InvalidResponse,
            "UNAUTHORIZED" => Self::Unauthorized,
            "NOT_FOUND" => Self::NotFound,
            "FORBIDDEN" => Self::Forbidden,
            "INTERNAL_ERROR" => Self::InternalError,
            "METHOD_NOT_ALLOWED" => Self::MethodNotAllowed,
            "INVALID_JSON" => Self::InvalidJson,
            "INVALID_MULTIPART" => Self::InvalidMultipart,
            "MISSING_MANIFEST" => Self::MissingManifest,
            "MISSING_FILE_PART" => Self::MissingFilePart,
            "REQUEST_ABORTED" => Self::RequestAborted,
            _ => Self::HttpError,
        }
    }
}

impl std::fmt::Display for TunnelErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl KilnError {
    /// A user-facing remediation string, distinct from the `Display` message.
    /// Meant to be actionable, e.g. pointing at `.inputSchema()` for a task
    /// input validation failure.
    #[must_use]
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::DuplicateRegistration { kind, id } => Some(format!(
                "rename one of the two {kind}s registered as \"{id}\", or remove the duplicate registration"
            )),
            Self::DependencyNotFound { dependency_id, .. } => Some(format!(
                "register a unit with id \"{dependency_id}\", or remove it from the dependency map"
            )),
            Self::CircularDependencies {
                involves_middleware,
                ..
            } => {
                if *involves_middleware {
                    Some(
                        "a middleware attachment is part of this cycle; middleware \
                        dependencies are resolved before the task/resource they wrap, so \
                        a middleware cannot (directly or transitively) depend on its own host"
                            .to_string(),
                    )
                } else {
                    Some("break the cycle by removing one of the edges in the path above".to_string())
                }
            }
            Self::VisibilityViolation {
                gating_owner_id,
                export_set,
                ..
            } => Some(format!(
                "add the target to \"{gating_owner_id}\".exports([...]) (currently: [{}])",
                export_set.join(", ")
            )),
            Self::DependencyAccessPolicyViolation {
                policy_owner_id,..
            } => Some(format!(
                "remove the matching entry from \"{policy_owner_id}\".dependencyAccessPolicy.deny"
            )),
            Self::Validation { subject, .. } => {
                let accessor = match *subject {
                    "Task input" => ".inputSchema()",
                    "Task result" => ".resultSchema()",
                    "Resource config" => ".configSchema()",
                    "Event payload" => ".schema()",
                    "Middleware config" => ".configSchema()",
                    _ => ".schema()",
                };
                Some(format!("check the shape expected by {accessor}"))
            }
            Self::PhantomTaskNotRouted { task_id } => Some(format!(
                "register a server-mode tunnel resource whose `tasks` list includes \"{task_id}\", \
                or give the task a `run` implementation"
            )),
            Self::SemaphoreInvalidPermits => {
                Some("construct the semaphore with a permit count >= 1".to_string())
            }
            Self::SemaphoreNonIntegerPermits => {
                Some("pass a whole number of permits".to_string())
            }
            Self::ExposureMissingToken => Some(
                "call ExposureConfig::with_token(...), or opt in explicitly with \
                with_allow_anonymous(true) / with_dangerously_allow_open_exposure(true)"
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// True when this error represents a cancellation, useful for callers
    /// that want to distinguish "cancelled" from "failed".
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancellation)
    }
}
