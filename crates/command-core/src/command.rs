//! The command record: the unit of work the store persists and the server
//! hands out to agents.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The kind of work a command describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Delay,
    HttpGetJson,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Delay => "DELAY",
            CommandType::HttpGetJson => "HTTP_GET_JSON",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DELAY" => Some(CommandType::Delay),
            "HTTP_GET_JSON" => Some(CommandType::HttpGetJson),
            _ => None,
        }
    }
}

/// The typed, validated payload for a command.
///
/// Commands arrive over the wire as `{ type, payload }` with `payload` a
/// loose JSON object; [`CommandPayload::validate`] is the single place that
/// payload shape is checked against `type`, so nothing downstream of
/// `create` ever has to re-validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandPayload {
    Delay { ms: i64 },
    HttpGetJson { url: String },
}

impl CommandPayload {
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandPayload::Delay { .. } => CommandType::Delay,
            CommandPayload::HttpGetJson { .. } => CommandType::HttpGetJson,
        }
    }

    /// Validate a raw JSON payload against the claimed command type.
    ///
    /// DELAY requires a non-negative integer `ms`; HTTP_GET_JSON requires a
    /// string `url`. Anything else is a [`ValidationError`].
    pub fn validate(
        command_type: CommandType,
        raw: &serde_json::Value,
    ) -> Result<Self, ValidationError> {
        match command_type {
            CommandType::Delay => {
                let ms = raw
                    .get("ms")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| ValidationError::new("payload.ms must be a non-negative integer"))?;
                if ms < 0 {
                    return Err(ValidationError::new("payload.ms must be non-negative"));
                }
                Ok(CommandPayload::Delay { ms })
            }
            CommandType::HttpGetJson => {
                let url = raw
                    .get("url")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ValidationError::new("payload.url must be a string"))?;
                Ok(CommandPayload::HttpGetJson {
                    url: url.to_string(),
                })
            }
        }
    }
}

/// Current lifecycle state of a command. See the Command Record invariants:
/// PENDING implies no lease fields are set, RUNNING implies all of them are,
/// and COMPLETED/FAILED are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// The authoritative server-side record for one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub agent_id: Option<String>,
    pub lease_id: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub attempt: i64,
    pub scheduled_end_at: Option<i64>,
}

impl CommandRecord {
    /// True once no further store operation can change `status` or `result`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, CommandStatus::Completed | CommandStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delay_payload_round_trips() {
        let raw = json!({"ms": 500});
        let payload = CommandPayload::validate(CommandType::Delay, &raw).unwrap();
        assert_eq!(payload, CommandPayload::Delay { ms: 500 });
    }

    #[test]
    fn delay_payload_rejects_negative_ms() {
        let raw = json!({"ms": -1});
        assert!(CommandPayload::validate(CommandType::Delay, &raw).is_err());
    }

    #[test]
    fn delay_payload_rejects_missing_ms() {
        let raw = json!({});
        assert!(CommandPayload::validate(CommandType::Delay, &raw).is_err());
    }

    #[test]
    fn http_payload_requires_string_url() {
        let raw = json!({"url": 5});
        assert!(CommandPayload::validate(CommandType::HttpGetJson, &raw).is_err());
    }

    #[test]
    fn http_payload_round_trips() {
        let raw = json!({"url": "https://example.com"});
        let payload = CommandPayload::validate(CommandType::HttpGetJson, &raw).unwrap();
        assert_eq!(
            payload,
            CommandPayload::HttpGetJson {
                url: "https://example.com".to_string()
            }
        );
    }

    #[test]
    fn command_type_wire_names() {
        assert_eq!(CommandType::Delay.as_str(), "DELAY");
        assert_eq!(CommandType::HttpGetJson.as_str(), "HTTP_GET_JSON");
        assert_eq!(CommandType::parse("DELAY"), Some(CommandType::Delay));
        assert_eq!(CommandType::parse("nonsense"), None);
    }

    #[test]
    fn terminal_status() {
        let mut record = CommandRecord {
            id: "c1".into(),
            command_type: CommandType::Delay,
            payload: json!({"ms": 0}),
            status: CommandStatus::Running,
            result: None,
            error: None,
            agent_id: Some("a1".into()),
            lease_id: Some("l1".into()),
            lease_expires_at: Some(1),
            created_at: 0,
            started_at: Some(0),
            attempt: 1,
            scheduled_end_at: Some(0),
        };
        assert!(!record.is_terminal());
        record.status = CommandStatus::Completed;
        assert!(record.is_terminal());
    }
}
