//! Command payloads exchanged with the device.

use crate::WireResult;
use serde::{Deserialize, Serialize};

/// A command sent to the device, through the relay or over the direct
/// local path.
///
/// Field names follow the device's wire convention (PascalCase). Unset
/// value slots are omitted entirely rather than serialized as null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// The command name, e.g. "Heartbeat" or "GetConfig".
    #[serde(rename = "Command")]
    pub command: String,
    #[serde(rename = "Value1", default, skip_serializing_if = "Option::is_none")]
    pub value1: Option<serde_json::Value>,
    #[serde(rename = "Value2", default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<serde_json::Value>,
    #[serde(rename = "Value3", default, skip_serializing_if = "Option::is_none")]
    pub value3: Option<serde_json::Value>,
    #[serde(rename = "Value4", default, skip_serializing_if = "Option::is_none")]
    pub value4: Option<serde_json::Value>,
    /// Correlation code, attached only when the sender expects a reply.
    #[serde(rename = "ResponseCode", default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u64>,
}

impl CommandMessage {
    /// Create a command with no values attached.
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            value1: None,
            value2: None,
            value3: None,
            value4: None,
            response_code: None,
        }
    }

    /// Create a command carrying up to four opaque value slots.
    pub fn with_values(command: &str, values: [Option<serde_json::Value>; 4]) -> Self {
        let [value1, value2, value3, value4] = values;
        Self {
            command: command.to_string(),
            value1,
            value2,
            value3,
            value4,
            response_code: None,
        }
    }

    /// Create a Heartbeat probe.
    pub fn heartbeat() -> Self {
        Self::new("Heartbeat")
    }

    /// Create a GetConfig request.
    pub fn get_config() -> Self {
        Self::new("GetConfig")
    }

    /// Create a SetConfig request. The new config travels as Value1.
    pub fn set_config(config: serde_json::Value) -> Self {
        let mut message = Self::new("SetConfig");
        message.value1 = Some(config);
        message
    }

    /// Serialize to the JSON string placed on the wire.
    pub fn to_json(&self) -> WireResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a command from its wire JSON.
    pub fn from_json(json: &str) -> WireResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
