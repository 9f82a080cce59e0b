//! Executors (spec.md §4.7): a small sum type over `{Delay, HttpGetJson}`
//! with a unified `execute` operation, per spec.md §9's redesign note -
//! no open extension point is needed for two known command kinds.

mod delay;
mod http_get_json;

use std::sync::Arc;

use command_core::CommandType;

use crate::journal::{AgentJournal, JournalManager, JournalStage};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The heartbeat observed the lease was no longer current; the main
    /// loop converts this into "drop journal, continue" rather than
    /// stringly-typed error matching (spec.md §9).
    #[error("lease expired during execution")]
    LeaseExpired,

    #[error("executor failed: {0}")]
    Failed(String),
}

/// Injected every ~1s while an executor is waiting on something, so it can
/// fail fast the moment the heartbeat invalidates the lease, and so the
/// `--random-failures` fault-injection hook has a place to run.
pub trait LeaseCheck: Send + Sync {
    fn is_valid(&self) -> bool;
}

impl<F: Fn() -> bool + Send + Sync> LeaseCheck for F {
    fn is_valid(&self) -> bool {
        self()
    }
}

/// Calls back (typically to terminate the process) when the probabilistic
/// failure hook fires under `--random-failures`.
pub type FailureHook = Arc<dyn Fn() + Send + Sync>;

pub struct ExecutorContext<'a> {
    journal_manager: &'a JournalManager,
    journal: AgentJournal,
    lease_check: &'a dyn LeaseCheck,
    failure_hook: Option<FailureHook>,
    http_client: reqwest::Client,
}

impl<'a> ExecutorContext<'a> {
    pub fn new(
        journal_manager: &'a JournalManager,
        journal: AgentJournal,
        lease_check: &'a dyn LeaseCheck,
        failure_hook: Option<FailureHook>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_millis(HTTP_TIMEOUT_MS as u64))
            .build()
            .expect("reqwest client with a static config always builds");

        Self {
            journal_manager,
            journal,
            lease_check,
            failure_hook,
            http_client,
        }
    }

    pub fn journal(&self) -> &AgentJournal {
        &self.journal
    }

    #[allow(dead_code)]
    pub fn into_journal(self) -> AgentJournal {
        self.journal
    }

    async fn advance_stage(&mut self, stage: JournalStage) -> anyhow::Result<()> {
        if self.journal.stage != stage {
            self.journal = self
                .journal_manager
                .update_stage(self.journal.clone(), stage)
                .await?;
        }
        Ok(())
    }

    /// Marks the journal `RESULT_SAVED` for executors (DELAY) whose result
    /// never passes through `save_http_snapshot`. A no-op if already there.
    pub(crate) async fn ensure_result_saved(&mut self) -> anyhow::Result<()> {
        self.advance_stage(JournalStage::ResultSaved).await
    }

    async fn save_http_snapshot(&mut self, snapshot: serde_json::Value) -> anyhow::Result<()> {
        self.journal = self
            .journal_manager
            .update_http_snapshot(self.journal.clone(), snapshot)
            .await?;
        Ok(())
    }

    fn check_lease_valid(&self) -> bool {
        self.lease_check.is_valid()
    }

    /// Polled on each lease-check tick; fires the injected callback before
    /// any further progress when it trips.
    fn poll_simulated_failure(&self) {
        if let Some(hook) = &self.failure_hook {
            if fastrand::f64() < RANDOM_FAILURE_PROBABILITY {
                hook();
            }
        }
    }
}

const RANDOM_FAILURE_PROBABILITY: f64 = 0.1;
const HTTP_TIMEOUT_MS: i64 = 30_000;
const HTTP_BODY_CHAR_LIMIT: usize = 10_240;

/// The two executable command kinds.
#[derive(Debug, Clone, Copy)]
pub enum Executor {
    Delay,
    HttpGetJson,
}

impl Executor {
    pub fn for_type(command_type: CommandType) -> Self {
        match command_type {
            CommandType::Delay => Executor::Delay,
            CommandType::HttpGetJson => Executor::HttpGetJson,
        }
    }

    pub async fn execute(
        &self,
        payload: &serde_json::Value,
        ctx: &mut ExecutorContext<'_>,
    ) -> Result<serde_json::Value, ExecutorError> {
        match self {
            Executor::Delay => delay::execute(payload, ctx).await,
            Executor::HttpGetJson => http_get_json::execute(payload, ctx).await,
        }
    }
}
