//! Shared test harness for the command-dispatch service.
//!
//! Two ways to get a [`CommandStore`] in a test:
//!
//! - [`MockCommandStore`] - an in-memory, `Mutex`-guarded store for unit
//!   tests of the server handlers or agent loop that shouldn't need a real
//!   database.
//! - [`temp_sqlite_store`] - a real [`SqliteCommandStore`] backed by a file
//!   in a [`tempfile::TempDir`], for integration tests that want to exercise
//!   the actual SQL.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use command_core::{
    ClaimCommand, CommandRecord, CommandStatus, CommandStore, CommandType, CreateCommand,
    FailCommand, StoreError,
};
use command_store_sqlite::SqliteCommandStore;

/// Spin up a [`SqliteCommandStore`] backed by a file inside a fresh temp
/// directory. The directory is returned alongside the store so the caller
/// can keep it alive for the duration of the test (it deletes on drop).
pub async fn temp_sqlite_store() -> (SqliteCommandStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("commands.db");
    let store = SqliteCommandStore::open(&db_path)
        .await
        .expect("open sqlite store");
    (store, dir)
}

/// An in-memory [`CommandStore`] for tests that shouldn't need a database.
///
/// Mirrors the claim/heartbeat/complete/fail semantics of a real backend,
/// including the identity checks that make those operations conditional,
/// but keeps everything in a `Mutex<HashMap>` so assertions can inspect
/// state directly via [`MockCommandStore::get_sync`].
#[derive(Debug, Default)]
pub struct MockCommandStore {
    records: Mutex<HashMap<String, CommandRecord>>,
}

impl MockCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a PENDING command directly, bypassing `create`.
    pub fn seed(&self, record: CommandRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    /// Synchronous peek at a record, for assertions.
    pub fn get_sync(&self, id: &str) -> Option<CommandRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CommandStore for MockCommandStore {
    async fn create(&self, req: CreateCommand) -> Result<CommandRecord, StoreError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&req.id) {
            return Err(StoreError::Conflict);
        }
        let record = CommandRecord {
            id: req.id.clone(),
            command_type: req.command_type,
            payload: req.payload,
            status: CommandStatus::Pending,
            result: None,
            error: None,
            agent_id: None,
            lease_id: None,
            lease_expires_at: None,
            created_at: req.created_at,
            started_at: None,
            attempt: 0,
            scheduled_end_at: None,
        };
        records.insert(req.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<CommandRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn claim(&self, req: ClaimCommand) -> Result<Option<CommandRecord>, StoreError> {
        let mut records = self.records.lock().unwrap();
        let mut candidates: Vec<&mut CommandRecord> = records
            .values_mut()
            .filter(|r| r.status == CommandStatus::Pending)
            .collect();
        candidates.sort_by_key(|r| r.created_at);

        let Some(record) = candidates.into_iter().next() else {
            return Ok(None);
        };

        record.status = CommandStatus::Running;
        record.agent_id = Some(req.agent_id);
        record.lease_id = Some(req.lease_id);
        record.lease_expires_at = Some(req.now + req.max_lease_ms);
        record.started_at = Some(req.now);
        record.attempt += 1;
        record.scheduled_end_at = match record.command_type {
            CommandType::Delay => record
                .payload
                .get("ms")
                .and_then(|v| v.as_i64())
                .map(|ms| req.now + ms),
            CommandType::HttpGetJson => None,
        };
        Ok(Some(record.clone()))
    }

    async fn heartbeat(
        &self,
        command_id: &str,
        agent_id: &str,
        lease_id: &str,
        extend_ms: i64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(command_id) else {
            return Ok(false);
        };
        if !identity_matches(record, agent_id, lease_id) {
            return Ok(false);
        }
        record.lease_expires_at = Some(now + extend_ms);
        Ok(true)
    }

    async fn complete(
        &self,
        command_id: &str,
        agent_id: &str,
        lease_id: &str,
        result: serde_json::Value,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(command_id) else {
            return Ok(false);
        };
        if !identity_matches(record, agent_id, lease_id) {
            return Ok(false);
        }
        record.status = CommandStatus::Completed;
        record.result = Some(result);
        record.lease_expires_at = None;
        Ok(true)
    }

    async fn fail(&self, req: FailCommand<'_>) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(req.command_id) else {
            return Ok(false);
        };
        if !identity_matches(record, req.agent_id, req.lease_id) {
            return Ok(false);
        }
        record.status = CommandStatus::Failed;
        record.error = Some(req.error.to_string());
        record.result = req.result;
        record.lease_expires_at = None;
        Ok(true)
    }

    async fn reset_expired_leases(&self, now: i64) -> Result<u64, StoreError> {
        let mut records = self.records.lock().unwrap();
        let mut reset = 0;
        for record in records.values_mut() {
            if record.status == CommandStatus::Running
                && record.lease_expires_at.is_some_and(|exp| exp <= now)
            {
                record.status = CommandStatus::Pending;
                record.agent_id = None;
                record.lease_id = None;
                record.lease_expires_at = None;
                record.started_at = None;
                record.scheduled_end_at = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn close(&self) {}
}

fn identity_matches(record: &CommandRecord, agent_id: &str, lease_id: &str) -> bool {
    record.status == CommandStatus::Running
        && record.agent_id.as_deref() == Some(agent_id)
        && record.lease_id.as_deref() == Some(lease_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_store_claim_is_fifo_by_created_at() {
        let store = MockCommandStore::new();
        store
            .create(CreateCommand {
                id: "later".into(),
                command_type: CommandType::Delay,
                payload: serde_json::json!({"ms": 0}),
                created_at: 100,
            })
            .await
            .unwrap();
        store
            .create(CreateCommand {
                id: "earlier".into(),
                command_type: CommandType::Delay,
                payload: serde_json::json!({"ms": 0}),
                created_at: 10,
            })
            .await
            .unwrap();

        let claimed = store
            .claim(ClaimCommand {
                agent_id: "a1".into(),
                lease_id: "l1".into(),
                max_lease_ms: 1000,
                now: 200,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, "earlier");
    }

    #[tokio::test]
    async fn mock_store_rejects_mismatched_lease() {
        let store = MockCommandStore::new();
        store
            .create(CreateCommand {
                id: "c1".into(),
                command_type: CommandType::HttpGetJson,
                payload: serde_json::json!({"url": "https://example.test"}),
                created_at: 0,
            })
            .await
            .unwrap();
        store
            .claim(ClaimCommand {
                agent_id: "a1".into(),
                lease_id: "l1".into(),
                max_lease_ms: 1000,
                now: 0,
            })
            .await
            .unwrap();

        assert!(!store
            .complete("c1", "a1", "wrong-lease", serde_json::json!({}))
            .await
            .unwrap());
        assert!(store
            .complete("c1", "a1", "l1", serde_json::json!({}))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn temp_sqlite_store_round_trips() {
        let (store, _dir) = temp_sqlite_store().await;
        let record = store
            .create(CreateCommand {
                id: "x1".into(),
                command_type: CommandType::Delay,
                payload: serde_json::json!({"ms": 5}),
                created_at: 0,
            })
            .await
            .unwrap();
        assert_eq!(record.status, CommandStatus::Pending);
        store.close().await;
    }
}
