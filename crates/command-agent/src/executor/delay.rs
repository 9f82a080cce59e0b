//! DELAY executor (spec.md §4.7.1).
//!
//! `tookMs` is a pure function of the journal's absolute timestamps, not
//! wall-clock time actually spent waiting - so a crash mid-delay and a
//! straight-through run report the identical value once resumed (spec.md
//! §8 invariant 5).

use serde_json::{json, Value};

use crate::executor::{ExecutorContext, ExecutorError};
use crate::journal::JournalStage;
use crate::time::now_ms;

const LEASE_CHECK_TICK_MS: i64 = 1_000;

pub async fn execute(
    payload: &Value,
    ctx: &mut ExecutorContext<'_>,
) -> Result<Value, ExecutorError> {
    let ms = payload.get("ms").and_then(|v| v.as_i64()).unwrap_or(0);
    let started_at = ctx.journal().started_at;
    let deadline = ctx.journal().scheduled_end_at.unwrap_or(started_at + ms);

    if ctx.journal().stage == JournalStage::Claimed {
        ctx.advance_stage(JournalStage::InProgress)
            .await
            .map_err(|err| ExecutorError::Failed(err.to_string()))?;
    }

    loop {
        let now = now_ms();
        if deadline <= now {
            return Ok(json!({"ok": true, "tookMs": deadline - started_at}));
        }

        ctx.poll_simulated_failure();
        if !ctx.check_lease_valid() {
            return Err(ExecutorError::LeaseExpired);
        }

        let remaining = (deadline - now).clamp(0, LEASE_CHECK_TICK_MS);
        tokio::time::sleep(std::time::Duration::from_millis(remaining as u64)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{AgentJournal, JournalManager};
    use command_core::CommandType;

    fn always_valid() -> impl Fn() -> bool {
        || true
    }

    #[tokio::test]
    async fn zero_ms_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JournalManager::new(dir.path().join("a.json"));
        let now = now_ms();
        let journal =
            AgentJournal::claimed("c1".into(), "l1".into(), CommandType::Delay, now, Some(now));
        let check = always_valid();
        let mut ctx = ExecutorContext::new(&manager, journal, &check, None);

        let result = execute(&json!({"ms": 0}), &mut ctx).await.unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["tookMs"], 0);
    }

    #[tokio::test]
    async fn waits_until_scheduled_end_at() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JournalManager::new(dir.path().join("a.json"));
        let now = now_ms();
        let journal = AgentJournal::claimed(
            "c1".into(),
            "l1".into(),
            CommandType::Delay,
            now,
            Some(now + 50),
        );
        let check = always_valid();
        let mut ctx = ExecutorContext::new(&manager, journal, &check, None);

        let result = execute(&json!({"ms": 50}), &mut ctx).await.unwrap();
        assert_eq!(result["tookMs"], 50);
        assert!(now_ms() >= now + 50);
    }

    #[tokio::test]
    async fn fails_fast_when_lease_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JournalManager::new(dir.path().join("a.json"));
        let now = now_ms();
        let journal = AgentJournal::claimed(
            "c1".into(),
            "l1".into(),
            CommandType::Delay,
            now,
            Some(now + 60_000),
        );
        let check = || false;
        let mut ctx = ExecutorContext::new(&manager, journal, &check, None);

        let err = execute(&json!({"ms": 60_000}), &mut ctx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::LeaseExpired));
    }

    #[tokio::test]
    async fn deadline_already_passed_on_resume_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JournalManager::new(dir.path().join("a.json"));
        let now = now_ms();
        // Simulates resuming from an IN_PROGRESS journal whose deadline is
        // already behind us - the crash took longer than the delay itself.
        let mut journal = AgentJournal::claimed(
            "c1".into(),
            "l1".into(),
            CommandType::Delay,
            now - 5_000,
            Some(now - 100),
        );
        journal.stage = JournalStage::InProgress;
        let check = always_valid();
        let mut ctx = ExecutorContext::new(&manager, journal, &check, None);

        let result = execute(&json!({"ms": 4_900}), &mut ctx).await.unwrap();
        assert_eq!(result["tookMs"], 4_900);
    }
}
