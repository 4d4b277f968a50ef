//! The JSON request bodies a tunnel peer sends over `application/json`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST {basePath}/task/{id}` body when the content type is JSON.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskRequestBody {
    /// The task's input.
    #[serde(default)]
    pub input: Value,
}

/// `POST {basePath}/event/{id}` body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventRequestBody {
    /// The event payload.
    #[serde(default)]
    pub payload: Value,
    /// Whether the server should emit with a result-returning wrapper and
    /// echo `{ result: payload }` back, for event-with-result tunneling.
    #[serde(default, rename = "returnPayload")]
    pub return_payload: bool,
}

/// The body an event-with-result response carries alongside (or instead
/// of) the envelope's own `result` when `returnPayload` was set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResultBody {
    /// The payload the server echoed back.
    pub result: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_request_defaults_input_to_null() {
        let body: TaskRequestBody = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(body.input, Value::Null);
    }

    #[test]
    fn event_request_return_payload_defaults_false() {
        let body: EventRequestBody = serde_json::from_value(serde_json::json!({"payload": 1})).unwrap();
        assert!(!body.return_payload);
    }
}
