//! Wire protocol for backend-controller communication.
//!
//! Every frame is one JSON object tagged by `type`:
//!
//! ```text
//! {"type":"request","id":"…","function":"SetURL","args":["redis://localhost:6379/0"]}
//! {"type":"response","id":"…","value":null}
//! {"type":"response","id":"…","error":"could not start measuring latency, …"}
//! ```
//!
//! Both sides send requests; a response carries the id of the request it
//! answers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Call identifier, correlating a request with its response.
pub type CallId = Uuid;

/// Function names of the RPC surface.
pub mod functions {
    /// Backend: replace the store address.
    pub const SET_URL: &str = "SetURL";
    /// Backend: replace the interval, in milliseconds.
    pub const SET_INTERVAL: &str = "SetInterval";
    /// Backend: replace the command list.
    pub const SET_COMMANDS: &str = "SetCommands";
    /// Backend: whether a session is running.
    pub const GET_IS_LATENCY_MEASURING: &str = "GetIsLatencyMeasuring";
    /// Backend: start a session for the calling peer.
    pub const START_LATENCY_MEASUREMENT: &str = "StartLatencyMeasurement";
    /// Backend: stop the running session.
    pub const STOP_LATENCY_MEASUREMENT: &str = "StopLatencyMeasurement";

    /// Peer: one sample, `(command, latency_us)`.
    pub const HANDLE_LATENCY_MEASUREMENT: &str = "HandleLatencyMeasurement";
    /// Peer: terminal probe failure, `(message)`.
    pub const HANDLE_ERROR: &str = "HandleError";
}

/// One request or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Invoke `function` on the receiving side.
    Request {
        id: CallId,
        function: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Outcome of the request with the same id.
    Response {
        id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Envelope {
    /// Create a request with a fresh call id.
    #[must_use]
    pub fn request(function: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Request {
            id: Uuid::new_v4(),
            function: function.into(),
            args,
        }
    }

    /// Create the response to call `id`.
    #[must_use]
    pub fn response(id: CallId, result: Result<Value, String>) -> Self {
        match result {
            Ok(value) => Self::Response {
                id,
                value: Some(value),
                error: None,
            },
            Err(error) => Self::Response {
                id,
                value: None,
                error: Some(error),
            },
        }
    }

    #[must_use]
    pub const fn id(&self) -> CallId {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => *id,
        }
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    /// Returns error if an argument cannot be represented as JSON.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns error if the text is not a valid envelope.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Split a response into its outcome. A response with neither field is a
/// successful call returning nothing.
#[must_use]
pub fn response_result(value: Option<Value>, error: Option<String>) -> Result<Value, String> {
    match error {
        Some(error) => Err(error),
        None => Ok(value.unwrap_or(Value::Null)),
    }
}
