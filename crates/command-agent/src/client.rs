//! Thin HTTP client over the control server's agent API (spec.md §6.1).
//!
//! "The agent client treats both transport errors and non-2xx responses as
//! 'operation failed'; only a direct 204 on complete/fail/heartbeat is
//! 'accepted', and only a 409 is 'lease no longer valid'" - this module is
//! the single place that distinction is made.

use serde::{Deserialize, Serialize};

use command_core::CommandType;

#[derive(Debug, Clone)]
pub struct ClaimedCommand {
    pub command_id: String,
    pub command_type: CommandType,
    pub payload: serde_json::Value,
    pub lease_id: String,
    pub lease_expires_at: i64,
    pub started_at: i64,
    pub scheduled_end_at: Option<i64>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    /// 204 - the server applied the change.
    Accepted,
    /// 409 - identity/state mismatch; the lease is already gone.
    LeaseInvalid,
    /// Anything else, including a transport failure.
    Failed,
}

#[derive(Debug, Deserialize)]
struct ClaimResponseWire {
    #[serde(rename = "commandId")]
    command_id: String,
    #[serde(rename = "type")]
    command_type: String,
    payload: serde_json::Value,
    #[serde(rename = "leaseId")]
    lease_id: String,
    #[serde(rename = "leaseExpiresAt")]
    lease_expires_at: i64,
    #[serde(rename = "startedAt")]
    started_at: i64,
    #[serde(rename = "scheduledEndAt")]
    scheduled_end_at: Option<i64>,
}

#[derive(Serialize)]
struct ClaimRequestWire<'a> {
    #[serde(rename = "agentId")]
    agent_id: &'a str,
    #[serde(rename = "maxLeaseMs")]
    max_lease_ms: i64,
}

#[derive(Serialize)]
struct HeartbeatRequestWire<'a> {
    #[serde(rename = "agentId")]
    agent_id: &'a str,
    #[serde(rename = "leaseId")]
    lease_id: &'a str,
    #[serde(rename = "extendMs")]
    extend_ms: i64,
}

#[derive(Serialize)]
struct CompleteRequestWire<'a> {
    #[serde(rename = "agentId")]
    agent_id: &'a str,
    #[serde(rename = "leaseId")]
    lease_id: &'a str,
    result: serde_json::Value,
}

#[derive(Serialize)]
struct FailRequestWire<'a> {
    #[serde(rename = "agentId")]
    agent_id: &'a str,
    #[serde(rename = "leaseId")]
    lease_id: &'a str,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
}

/// Talks to one control server on behalf of one agent.
#[derive(Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
}

impl ServerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// `POST /commands/claim`. `Ok(None)` covers both 204 (no work) and any
    /// transport/server failure - the caller just retries next poll.
    pub async fn claim(&self, agent_id: &str, max_lease_ms: i64) -> Option<ClaimedCommand> {
        let resp = self
            .http
            .post(format!("{}/commands/claim", self.base_url))
            .json(&ClaimRequestWire {
                agent_id,
                max_lease_ms,
            })
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(error = %err, "claim request failed, will retry next poll");
                return None;
            }
        };

        if resp.status() != reqwest::StatusCode::OK {
            return None;
        }

        match resp.json::<ClaimResponseWire>().await {
            Ok(wire) => {
                let Some(command_type) = CommandType::parse(&wire.command_type) else {
                    tracing::warn!(raw = %wire.command_type, "server returned an unknown command type");
                    return None;
                };
                Some(ClaimedCommand {
                    command_id: wire.command_id,
                    command_type,
                    payload: wire.payload,
                    lease_id: wire.lease_id,
                    lease_expires_at: wire.lease_expires_at,
                    started_at: wire.started_at,
                    scheduled_end_at: wire.scheduled_end_at,
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode claim response body");
                None
            }
        }
    }

    pub async fn heartbeat(
        &self,
        command_id: &str,
        agent_id: &str,
        lease_id: &str,
        extend_ms: i64,
    ) -> ReportOutcome {
        let resp = self
            .http
            .post(format!("{}/commands/{command_id}/heartbeat", self.base_url))
            .json(&HeartbeatRequestWire {
                agent_id,
                lease_id,
                extend_ms,
            })
            .send()
            .await;
        outcome_from(resp).await
    }

    pub async fn complete(
        &self,
        command_id: &str,
        agent_id: &str,
        lease_id: &str,
        result: serde_json::Value,
    ) -> ReportOutcome {
        let resp = self
            .http
            .post(format!("{}/commands/{command_id}/complete", self.base_url))
            .json(&CompleteRequestWire {
                agent_id,
                lease_id,
                result,
            })
            .send()
            .await;
        outcome_from(resp).await
    }

    #[allow(dead_code)]
    pub async fn fail(
        &self,
        command_id: &str,
        agent_id: &str,
        lease_id: &str,
        error: &str,
        result: Option<serde_json::Value>,
    ) -> ReportOutcome {
        let resp = self
            .http
            .post(format!("{}/commands/{command_id}/fail", self.base_url))
            .json(&FailRequestWire {
                agent_id,
                lease_id,
                error,
                result,
            })
            .send()
            .await;
        outcome_from(resp).await
    }
}

async fn outcome_from(resp: Result<reqwest::Response, reqwest::Error>) -> ReportOutcome {
    match resp {
        Ok(resp) if resp.status() == reqwest::StatusCode::NO_CONTENT => ReportOutcome::Accepted,
        Ok(resp) if resp.status() == reqwest::StatusCode::CONFLICT => ReportOutcome::LeaseInvalid,
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), "unexpected response status");
            ReportOutcome::Failed
        }
        Err(err) => {
            tracing::warn!(error = %err, "request failed");
            ReportOutcome::Failed
        }
    }
}
