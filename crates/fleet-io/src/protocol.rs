use chrono::{DateTime, Utc};
use fleet_core::{CommandError, CommandOutcome, MachineAction, MachineStatus};
use serde::{Deserialize, Serialize};

pub const INVALID_MACHINE_ID: &str = "Invalid machine ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Error,
}

/// Body returned by the start/stop/maintenance endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandReply {
    pub fn success() -> Self {
        Self {
            status: ReplyStatus::Success,
            message: None,
        }
    }

    pub fn invalid_machine() -> Self {
        Self {
            status: ReplyStatus::Error,
            message: Some(INVALID_MACHINE_ID.to_string()),
        }
    }
}

impl From<&Result<CommandOutcome, CommandError>> for CommandReply {
    fn from(result: &Result<CommandOutcome, CommandError>) -> Self {
        match result {
            Ok(_) => Self::success(),
            Err(CommandError::InvalidIndex { .. }) => Self::invalid_machine(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReply {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthReply {
    pub fn healthy(version: &str) -> Self {
        Self {
            status: "healthy".to_string(),
            version: version.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Command line sent by a feed client.
#[derive(Debug, Deserialize)]
pub struct CommandMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub machine_id: i64,
    pub action: MachineAction,
}

/// Reply pushed to a feed client after a [`CommandMsg`].
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResultMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub machine_id: i64,
    pub action: MachineAction,
    #[serde(flatten)]
    pub reply: CommandReply,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_status: Option<MachineStatus>,
}

impl CommandResultMsg {
    pub fn new(machine_id: i64, action: MachineAction, reply: CommandReply) -> Self {
        Self {
            msg_type: "command_result".to_string(),
            machine_id,
            action,
            reply,
            machine_status: None,
        }
    }
}

#[derive(Debug)]
pub enum IncomingMessage {
    Command(CommandMsg),
}

impl IncomingMessage {
    pub fn parse(line: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let msg_type = value.get("type")?.as_str()?;
        match msg_type {
            "command" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::Command),
            _ => None,
        }
    }
}

/// Convert a client-supplied machine id into a fleet index. Negative ids
/// never address a machine.
pub fn machine_index(machine_id: i64) -> Option<usize> {
    usize::try_from(machine_id).ok()
}
