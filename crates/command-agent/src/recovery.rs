//! Startup recovery (spec.md §4.4): reconcile a leftover journal from a
//! previous process against what can safely be resumed.
//!
//! - `CLAIMED`, or any journal whose `type`/`stage` combination isn't one of
//!   the two resumable shapes below, carries no durable output worth
//!   reporting. It is dropped and the lease is left to expire so another
//!   agent reclaims the command.
//! - `IN_PROGRESS` + DELAY can be resumed: the deadline is already on disk,
//!   so the wait picks up exactly where it left off.
//! - `IN_PROGRESS` + HTTP_GET_JSON has no snapshot yet, so there is nothing
//!   to replay; it is dropped rather than reissuing the GET, the same as
//!   the unresumable case above.
//! - `RESULT_SAVED` is resumed for either command type: the executor's
//!   replay guard (HTTP_GET_JSON) or its already-elapsed deadline (DELAY)
//!   makes re-running it produce the same result without redoing any I/O.

use command_core::CommandType;
use serde_json::json;

use crate::client::ServerClient;
use crate::config::AgentConfig;
use crate::executor::{Executor, ExecutorContext, ExecutorError};
use crate::heartbeat::Heartbeat;
use crate::journal::{AgentJournal, JournalManager, JournalStage};

pub async fn recover(config: &AgentConfig, client: &ServerClient, journal_manager: &JournalManager) {
    let Some(journal) = journal_manager.load().await else {
        return;
    };

    if !is_resumable(&journal) {
        tracing::warn!(
            command_id = %journal.command_id,
            stage = ?journal.stage,
            "leftover journal is not resumable, dropping"
        );
        journal_manager.delete().await;
        return;
    }

    tracing::info!(command_id = %journal.command_id, stage = ?journal.stage, "resuming journal from previous run");

    let heartbeat = Heartbeat::spawn(
        client.clone(),
        journal.command_id.clone(),
        config.agent_id.clone(),
        journal.lease_id.clone(),
        config.heartbeat_interval_ms,
        config.heartbeat_extend_ms(),
    );

    let command_id = journal.command_id.clone();
    let lease_id = journal.lease_id.clone();
    let command_type = journal.command_type;
    let executor = Executor::for_type(command_type);
    let mut ctx = ExecutorContext::new(journal_manager, journal, &heartbeat, None);

    let outcome = executor.execute(&dummy_payload(command_type), &mut ctx).await;

    match outcome {
        Ok(result) => {
            if let Err(err) = ctx.ensure_result_saved().await {
                tracing::warn!(error = %err, "failed to persist RESULT_SAVED stage while resuming");
            }
            drop(ctx);
            heartbeat.stop().await;
            let _ = client
                .complete(&command_id, &config.agent_id, &lease_id, result)
                .await;
            journal_manager.delete().await;
        }
        Err(ExecutorError::LeaseExpired) => {
            drop(ctx);
            heartbeat.stop().await;
            tracing::warn!(command_id = %command_id, "lease expired while resuming, dropping journal");
            journal_manager.delete().await;
        }
        Err(ExecutorError::Failed(message)) => {
            drop(ctx);
            heartbeat.stop().await;
            tracing::error!(command_id = %command_id, error = %message, "resumed executor failed, dropping journal");
            journal_manager.delete().await;
        }
    }
}

fn is_resumable(journal: &AgentJournal) -> bool {
    match journal.stage {
        JournalStage::ResultSaved => true,
        JournalStage::InProgress => journal.command_type == CommandType::Delay,
        JournalStage::Claimed => false,
    }
}

/// Neither resumable path reads the payload: DELAY's deadline lives on the
/// journal, and HTTP_GET_JSON's replay guard returns before touching it.
fn dummy_payload(command_type: CommandType) -> serde_json::Value {
    match command_type {
        CommandType::Delay => json!({"ms": 0}),
        CommandType::HttpGetJson => json!({}),
    }
}
