//! Wire-level request/response bodies for the HTTP API (spec.md §6.1).
//!
//! Request bodies are parsed from a raw `serde_json::Value` rather than
//! derived `Deserialize` impls so that a missing or wrong-typed top-level
//! field becomes a `ValidationError` (HTTP 400, spec.md §7) instead of
//! axum's `Json` extractor's own 422 on a shape mismatch.

use command_core::ValidationError;
use serde::Serialize;

fn field_str(value: &serde_json::Value, key: &str) -> Result<String, ValidationError> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ValidationError::new(format!("{key} must be a non-null string")))
}

fn field_i64(value: &serde_json::Value, key: &str) -> Result<i64, ValidationError> {
    value
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ValidationError::new(format!("{key} must be an integer")))
}

fn field_value(value: &serde_json::Value, key: &str) -> Result<serde_json::Value, ValidationError> {
    value
        .get(key)
        .cloned()
        .ok_or_else(|| ValidationError::new(format!("{key} is required")))
}

pub struct CreateRequest {
    pub command_type: String,
    pub payload: serde_json::Value,
}

impl TryFrom<&serde_json::Value> for CreateRequest {
    type Error = ValidationError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(Self {
            command_type: field_str(value, "type")?,
            payload: field_value(value, "payload")?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    #[serde(rename = "commandId")]
    pub command_id: String,
}

#[derive(Debug, Serialize)]
pub struct GetResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

pub struct ClaimRequest {
    pub agent_id: String,
    pub max_lease_ms: i64,
}

impl TryFrom<&serde_json::Value> for ClaimRequest {
    type Error = ValidationError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(Self {
            agent_id: field_str(value, "agentId")?,
            max_lease_ms: field_i64(value, "maxLeaseMs")?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    #[serde(rename = "commandId")]
    pub command_id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    pub payload: serde_json::Value,
    #[serde(rename = "leaseId")]
    pub lease_id: String,
    #[serde(rename = "leaseExpiresAt")]
    pub lease_expires_at: i64,
    #[serde(rename = "startedAt")]
    pub started_at: i64,
    #[serde(rename = "scheduledEndAt")]
    pub scheduled_end_at: Option<i64>,
}

pub struct HeartbeatRequest {
    pub agent_id: String,
    pub lease_id: String,
    pub extend_ms: i64,
}

impl TryFrom<&serde_json::Value> for HeartbeatRequest {
    type Error = ValidationError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(Self {
            agent_id: field_str(value, "agentId")?,
            lease_id: field_str(value, "leaseId")?,
            extend_ms: field_i64(value, "extendMs")?,
        })
    }
}

pub struct CompleteRequest {
    pub agent_id: String,
    pub lease_id: String,
    pub result: serde_json::Value,
}

impl TryFrom<&serde_json::Value> for CompleteRequest {
    type Error = ValidationError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(Self {
            agent_id: field_str(value, "agentId")?,
            lease_id: field_str(value, "leaseId")?,
            result: field_value(value, "result")?,
        })
    }
}

pub struct FailRequest {
    pub agent_id: String,
    pub lease_id: String,
    pub error: String,
    pub result: Option<serde_json::Value>,
}

impl TryFrom<&serde_json::Value> for FailRequest {
    type Error = ValidationError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(Self {
            agent_id: field_str(value, "agentId")?,
            lease_id: field_str(value, "leaseId")?,
            error: field_str(value, "error")?,
            result: value.get("result").cloned(),
        })
    }
}
