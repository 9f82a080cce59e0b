//! Axum handlers: each one is a thin translation of a request into a
//! single `CommandStore` call, matching spec.md §4.2's transition table.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use command_core::{
    ClaimCommand, CommandError, CommandPayload, CommandStatus, CommandType, CreateCommand,
    FailCommand, ValidationError,
};

use crate::api::{
    ClaimRequest, ClaimResponse, CompleteRequest, CreateRequest, CreateResponse, FailRequest,
    GetResponse, HeartbeatRequest,
};
use crate::error::ApiError;
use crate::state::{now_ms, AppState};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/commands", post(create_command))
        .route("/commands/:id", get(get_command))
        .route("/commands/claim", post(claim_command))
        .route("/commands/:id/heartbeat", post(heartbeat_command))
        .route("/commands/:id/complete", post(complete_command))
        .route("/commands/:id/fail", post(fail_command))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn create_command(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req = CreateRequest::try_from(&body).map_err(CommandError::from)?;
    let command_type = CommandType::parse(&req.command_type)
        .ok_or_else(|| ValidationError::new("type must be DELAY or HTTP_GET_JSON"))
        .map_err(CommandError::from)?;
    let payload = CommandPayload::validate(command_type, &req.payload)
        .map_err(CommandError::from)?;
    let payload = serde_json::to_value(payload).expect("CommandPayload always serializes");

    let record = state
        .store
        .create(CreateCommand {
            id: command_core::ids::new_command_id(),
            command_type,
            payload,
            created_at: now_ms(),
        })
        .await
        .map_err(CommandError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            command_id: record.id,
        }),
    ))
}

async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .store
        .get(&id)
        .await
        .map_err(CommandError::from)?
        .ok_or(CommandError::NotFound)?;

    let status = match record.status {
        CommandStatus::Pending => "PENDING",
        CommandStatus::Running => "RUNNING",
        CommandStatus::Completed => "COMPLETED",
        CommandStatus::Failed => "FAILED",
    };

    Ok(Json(GetResponse {
        status: status.to_string(),
        result: record.result,
        error: record.error,
        agent_id: record.agent_id,
    }))
}

async fn claim_command(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req = ClaimRequest::try_from(&body).map_err(CommandError::from)?;
    if req.agent_id.is_empty() {
        return Err(CommandError::from(ValidationError::new("agentId must be non-empty")).into());
    }

    let claimed = state
        .store
        .claim(ClaimCommand {
            agent_id: req.agent_id,
            lease_id: command_core::ids::new_lease_id(),
            max_lease_ms: req.max_lease_ms,
            now: now_ms(),
        })
        .await
        .map_err(CommandError::from)?;

    let Some(record) = claimed else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let body = ClaimResponse {
        command_id: record.id,
        command_type: record.command_type.as_str().to_string(),
        payload: record.payload,
        lease_id: record.lease_id.expect("claimed row always has a lease id"),
        lease_expires_at: record
            .lease_expires_at
            .expect("claimed row always has a lease deadline"),
        started_at: record.started_at.expect("claimed row always has started_at"),
        scheduled_end_at: record.scheduled_end_at,
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

async fn heartbeat_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req = HeartbeatRequest::try_from(&body).map_err(CommandError::from)?;
    require_identity(&req.agent_id, &req.lease_id)?;

    let changed = state
        .store
        .heartbeat(&id, &req.agent_id, &req.lease_id, req.extend_ms, now_ms())
        .await
        .map_err(CommandError::from)?;

    if changed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CommandError::LeaseConflict.into())
    }
}

async fn complete_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req = CompleteRequest::try_from(&body).map_err(CommandError::from)?;
    require_identity(&req.agent_id, &req.lease_id)?;

    let changed = state
        .store
        .complete(&id, &req.agent_id, &req.lease_id, req.result)
        .await
        .map_err(CommandError::from)?;

    if changed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CommandError::LeaseConflict.into())
    }
}

async fn fail_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req = FailRequest::try_from(&body).map_err(CommandError::from)?;
    require_identity(&req.agent_id, &req.lease_id)?;

    let changed = state
        .store
        .fail(FailCommand {
            command_id: &id,
            agent_id: &req.agent_id,
            lease_id: &req.lease_id,
            error: &req.error,
            result: req.result,
        })
        .await
        .map_err(CommandError::from)?;

    if changed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CommandError::LeaseConflict.into())
    }
}

fn require_identity(agent_id: &str, lease_id: &str) -> Result<(), ApiError> {
    if agent_id.is_empty() || lease_id.is_empty() {
        return Err(
            CommandError::from(ValidationError::new("agentId and leaseId must be non-empty"))
                .into(),
        );
    }
    Ok(())
}
