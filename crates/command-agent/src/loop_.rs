//! The worker agent loop (spec.md §4.3): claim, execute, report, forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::client::{ClaimedCommand, ServerClient};
use crate::config::AgentConfig;
use crate::executor::{Executor, ExecutorContext, ExecutorError, FailureHook};
use crate::heartbeat::Heartbeat;
use crate::journal::{AgentJournal, JournalManager};
use crate::recovery;

pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.state_dir)
        .await
        .map_err(|err| {
            anyhow::anyhow!(
                "state directory {} is not writable: {err}",
                config.state_dir.display()
            )
        })?;

    let client = ServerClient::new(config.server_url.clone());
    let journal_manager = JournalManager::new(config.journal_path());

    if let Some(duration) = config.kill_after {
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            tracing::warn!(?duration, "kill-after elapsed, terminating process");
            std::process::exit(1);
        });
    }

    recovery::recover(&config, &client, &journal_manager).await;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, finishing current iteration");
                running.store(false, Ordering::SeqCst);
            }
        });
    }

    let poll_interval = std::time::Duration::from_millis(config.poll_interval_ms.max(0) as u64);

    while running.load(Ordering::SeqCst) {
        run_one_iteration(&config, &client, &journal_manager).await;
        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

async fn run_one_iteration(
    config: &AgentConfig,
    client: &ServerClient,
    journal_manager: &JournalManager,
) {
    let Some(claimed) = client.claim(&config.agent_id, config.max_lease_ms).await else {
        return;
    };

    match journal_manager.create_claimed(journal_for(&claimed)).await {
        Ok(journal) => execute_claimed(config, client, journal_manager, claimed, journal).await,
        Err(err) => {
            tracing::error!(error = %err, command_id = %claimed.command_id, "failed to write journal, dropping claim");
        }
    }
}

fn journal_for(claimed: &ClaimedCommand) -> AgentJournal {
    AgentJournal::claimed(
        claimed.command_id.clone(),
        claimed.lease_id.clone(),
        claimed.command_type,
        claimed.started_at,
        claimed.scheduled_end_at,
    )
}

async fn execute_claimed(
    config: &AgentConfig,
    client: &ServerClient,
    journal_manager: &JournalManager,
    claimed: ClaimedCommand,
    journal: AgentJournal,
) {
    let heartbeat = Heartbeat::spawn(
        client.clone(),
        claimed.command_id.clone(),
        config.agent_id.clone(),
        claimed.lease_id.clone(),
        config.heartbeat_interval_ms,
        config.heartbeat_extend_ms(),
    );
    let failure_hook = random_failure_hook(config);
    let executor = Executor::for_type(claimed.command_type);
    let mut ctx = ExecutorContext::new(journal_manager, journal, &heartbeat, failure_hook);

    let outcome = executor.execute(&claimed.payload, &mut ctx).await;

    match outcome {
        Ok(result) => {
            if let Err(err) = ctx.ensure_result_saved().await {
                tracing::warn!(error = %err, "failed to persist RESULT_SAVED stage before reporting");
            }
            drop(ctx);
            heartbeat.stop().await;
            // Whether the server accepts (204) or rejects as stale (409),
            // the journal is deleted - a 409 means this lease is already
            // gone and retrying would just produce identical 409s forever.
            let _ = client
                .complete(&claimed.command_id, &config.agent_id, &claimed.lease_id, result)
                .await;
            journal_manager.delete().await;
        }
        Err(ExecutorError::LeaseExpired) => {
            drop(ctx);
            heartbeat.stop().await;
            tracing::warn!(command_id = %claimed.command_id, "lease expired mid-execution, dropping journal without reporting");
            journal_manager.delete().await;
        }
        Err(ExecutorError::Failed(message)) => {
            drop(ctx);
            heartbeat.stop().await;
            tracing::error!(command_id = %claimed.command_id, error = %message, "executor failed, dropping journal rather than reporting failure");
            journal_manager.delete().await;
        }
    }
}

fn random_failure_hook(config: &AgentConfig) -> Option<FailureHook> {
    if !config.random_failures {
        return None;
    }
    Some(Arc::new(|| {
        tracing::error!("simulated failure hook triggered, terminating process");
        std::process::exit(1);
    }))
}
