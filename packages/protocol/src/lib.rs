// ABOUTME: Wire types shared by the runtime control plane and the in-container executor
// ABOUTME: Defines the flat observation JSON model and the action request bodies

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Exit code reported when an action fails before or outside the executed
/// process itself (handshake failures, internal executor errors).
pub const INTERNAL_ERROR_EXIT_CODE: i32 = -1;

/// Kind of a typed observation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationType {
    /// Synthesized by the runtime when an action is dispatched.
    Start,
    /// One line of process or kernel output.
    Stream,
    /// Terminal message from the executor carrying the exit code.
    Result,
    /// A failure report; may occur mid-action.
    Error,
    /// Synthesized by the runtime; always the last observation of an action.
    End,
}

/// Which output stream a `stream` observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A single observation event about an action.
///
/// The serialized form is flat: type-dependent fields sit next to the
/// required ones and unset fields are omitted. This is the shape executors
/// push and the shape WebSocket subscribers receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub observation_type: ObservationType,
    #[serde(default)]
    pub action_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Observation {
    fn new(observation_type: ObservationType, action_id: &str) -> Self {
        Self {
            observation_type,
            action_id: action_id.to_string(),
            timestamp: now_timestamp(),
            stream: None,
            line: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn start(action_id: &str) -> Self {
        Self::new(ObservationType::Start, action_id)
    }

    pub fn stream(action_id: &str, kind: StreamKind, line: impl Into<String>) -> Self {
        Self {
            stream: Some(kind),
            line: Some(line.into()),
            ..Self::new(ObservationType::Stream, action_id)
        }
    }

    pub fn result(action_id: &str, exit_code: i32, error: Option<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            error,
            ..Self::new(ObservationType::Result, action_id)
        }
    }

    pub fn error(action_id: &str, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(ObservationType::Error, action_id)
        }
    }

    pub fn end(action_id: &str, exit_code: i32, error: Option<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            error,
            ..Self::new(ObservationType::End, action_id)
        }
    }

    /// Serialize to the single-frame JSON form carried on the stream.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Current time as RFC 3339 with nanosecond precision in UTC.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Request body for `POST /tools:run_shell_command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunShellCommandRequest {
    #[serde(default)]
    pub action_id: String,
    pub command: String,
    /// Extra environment merged over the executor's own environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Working directory; the executor's configured default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Request body for `POST /tools:run_ipython_cell`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIPythonCellRequest {
    #[serde(default)]
    pub action_id: String,
    pub code: String,
}
