//! Wire format of the command channel.
//!
//! Client → server: `{"id": "...", "command": "list", "args": []}`
//!
//! Server → client: `{"id": "...", "commandName": "list", "status": 0, "payload": ...}`
//!
//! `id` is optional in both directions; untagged commands are
//! fire-and-forget and their replies reach only name-based subscribers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Reply status for a successful command.
pub const STATUS_OK: i32 = 0;
/// Reply status when the target JVM demands JMX credentials.
pub const STATUS_AUTH_CHALLENGE: i32 = 407;

/// Command names understood by the backend.
pub mod commands {
    pub const LIST: &str = "list";
    pub const LIST_SAVED: &str = "list-saved";
    pub const SAVE: &str = "save";
    pub const STOP: &str = "stop";
    pub const DELETE: &str = "delete";
    pub const DELETE_SAVED: &str = "delete-saved";
    pub const START: &str = "start";
    pub const DUMP: &str = "dump";
    pub const LIST_EVENT_TEMPLATES: &str = "list-event-templates";
    pub const SCAN_TARGETS: &str = "scan-targets";
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const IS_CONNECTED: &str = "is-connected";
    pub const UPLOAD_RECORDING: &str = "upload-recording";
    pub const UPLOAD_SAVED: &str = "upload-saved";
}

/// Outgoing command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandMessage {
    pub fn new(command: &str, args: Vec<String>, id: Option<String>) -> Self {
        Self {
            id,
            command: command.to_string(),
            args,
        }
    }
}

/// Incoming reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub command_name: String,
    pub status: i32,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ResponseMessage {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn is_auth_challenge(&self) -> bool {
        self.status == STATUS_AUTH_CHALLENGE
    }

    /// Decode the payload into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Payload rendered for a human: strings as-is, anything else as JSON.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}
