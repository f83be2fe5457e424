//! Relay long-poll reply envelope.

use crate::{WireError, WireResult};
use serde::{Deserialize, Serialize};

/// Status the relay answers when a reply arrived inside its hold window.
const STATUS_NEW_DATA: &str = "NewData";

/// Reply envelope returned by the relay long-poll endpoint.
///
/// `Status` is "NewData" when a reply arrived before the relay's hold
/// window closed; any other value (commonly "Timeout") means the window
/// expired with nothing to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollEnvelope {
    #[serde(rename = "Status")]
    pub status: String,
    /// Percent-encoded JSON reply, present only alongside "NewData".
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl PollEnvelope {
    /// Whether the envelope carries a fresh reply.
    pub fn has_new_data(&self) -> bool {
        self.status == STATUS_NEW_DATA
    }

    /// Decode the percent-encoded reply into JSON.
    pub fn decode_data(&self) -> WireResult<serde_json::Value> {
        let raw = self.data.as_deref().ok_or(WireError::MissingData)?;
        let decoded = urlencoding::decode(raw).map_err(|e| WireError::Decode(e.to_string()))?;
        Ok(serde_json::from_str(&decoded)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_new_data_reply() {
        let encoded = urlencoding::encode(r#"{"Status":"Success","LocalIp":"10.0.0.5"}"#).into_owned();
        let envelope: PollEnvelope =
            serde_json::from_value(json!({"Status": "NewData", "Data": encoded})).unwrap();

        assert!(envelope.has_new_data());
        let payload = envelope.decode_data().unwrap();
        assert_eq!(payload["LocalIp"], "10.0.0.5");
    }

    #[test]
    fn timeout_status_is_not_new_data() {
        let envelope: PollEnvelope = serde_json::from_value(json!({"Status": "Timeout"})).unwrap();

        assert!(!envelope.has_new_data());
        assert_eq!(envelope.data, None);
    }

    #[test]
    fn unknown_status_parses_as_expiry() {
        let envelope: PollEnvelope =
            serde_json::from_value(json!({"Status": "SomethingElse"})).unwrap();

        assert!(!envelope.has_new_data());
    }

    #[test]
    fn new_data_without_payload_is_an_error() {
        let envelope = PollEnvelope {
            status: "NewData".to_string(),
            data: None,
        };

        assert!(matches!(envelope.decode_data(), Err(WireError::MissingData)));
    }

    #[test]
    fn undecodable_payload_is_an_error() {
        let envelope = PollEnvelope {
            status: "NewData".to_string(),
            data: Some("not%20json".to_string()),
        };

        assert!(matches!(envelope.decode_data(), Err(WireError::Json(_))));
    }
}
