//! SQLite implementation of the command-dispatch service's `CommandStore`.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE commands (
//!     id TEXT PRIMARY KEY,
//!     command_type TEXT NOT NULL,
//!     payload TEXT NOT NULL,
//!     status TEXT NOT NULL,
//!     result TEXT,
//!     error TEXT,
//!     agent_id TEXT,
//!     lease_id TEXT,
//!     lease_expires_at INTEGER,
//!     created_at INTEGER NOT NULL,
//!     started_at INTEGER,
//!     attempt INTEGER NOT NULL DEFAULT 0,
//!     scheduled_end_at INTEGER
//! );
//!
//! CREATE INDEX idx_commands_status ON commands (status);
//! CREATE INDEX idx_commands_lease_expires_at ON commands (lease_expires_at);
//! CREATE INDEX idx_commands_created_at ON commands (created_at);
//! ```
//!
//! # Atomic claim without `FOR UPDATE SKIP LOCKED`
//!
//! SQLite has no row-level locking, so `claim` can't use the Postgres
//! `WITH claimable AS (... FOR UPDATE SKIP LOCKED) UPDATE ...` idiom this
//! store was ported from. Instead the oldest PENDING row is selected via a
//! correlated subquery inside a single `UPDATE ... RETURNING` statement. A
//! single SQL statement is already atomic under SQLite's writer
//! serialization: only one connection at a time can hold the write lock, so
//! two concurrent claims can never both land on the same row - the second
//! claimant's subquery re-evaluates after the first's write commits and
//! finds a different row, or none.

use async_trait::async_trait;
use command_core::{
    ClaimCommand, CommandPayload, CommandRecord, CommandStatus, CommandStore, CommandType,
    CreateCommand, FailCommand, StoreError,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS commands (
    id TEXT PRIMARY KEY,
    command_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL,
    result TEXT,
    error TEXT,
    agent_id TEXT,
    lease_id TEXT,
    lease_expires_at INTEGER,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    attempt INTEGER NOT NULL DEFAULT 0,
    scheduled_end_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_commands_status ON commands (status);
CREATE INDEX IF NOT EXISTS idx_commands_lease_expires_at ON commands (lease_expires_at);
CREATE INDEX IF NOT EXISTS idx_commands_created_at ON commands (created_at);
"#;

const SELECT_COLUMNS_WHERE_ID: &str = r#"
SELECT id, command_type, payload, status, result, error, agent_id, lease_id,
       lease_expires_at, created_at, started_at, attempt, scheduled_end_at
FROM commands
WHERE id = ?
"#;

/// SQLite-backed [`CommandStore`].
#[derive(Clone)]
pub struct SqliteCommandStore {
    pool: SqlitePool,
}

impl SqliteCommandStore {
    /// Open (creating if absent) the SQLite file at `path` and apply the
    /// schema. Parent directories are created as needed.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Build a store around an already-open pool. Used by tests to share an
    /// in-memory database across a pool's connections.
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn create(&self, req: CreateCommand) -> Result<CommandRecord, StoreError> {
        let payload_str =
            serde_json::to_string(&req.payload).map_err(|err| StoreError::Backend(err.into()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO commands (id, command_type, payload, status, created_at, attempt)
            VALUES (?, ?, ?, 'PENDING', ?, 0)
            "#,
        )
        .bind(&req.id)
        .bind(req.command_type.as_str())
        .bind(&payload_str)
        .bind(req.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(StoreError::Conflict);
            }
            Err(err) => return Err(StoreError::Backend(err.into())),
        }

        self.get(&req.id)
            .await?
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("row vanished after insert")))
    }

    async fn get(&self, id: &str) -> Result<Option<CommandRecord>, StoreError> {
        let row = sqlx::query(SELECT_COLUMNS_WHERE_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(row_to_record).transpose()
    }

    async fn claim(&self, req: ClaimCommand) -> Result<Option<CommandRecord>, StoreError> {
        let lease_expires_at = req.now + req.max_lease_ms;

        let row = sqlx::query(
            r#"
            UPDATE commands
            SET status = 'RUNNING',
                agent_id = ?,
                lease_id = ?,
                lease_expires_at = ?,
                started_at = ?,
                attempt = attempt + 1,
                scheduled_end_at = CASE WHEN command_type = 'DELAY'
                    THEN ? + CAST(json_extract(payload, '$.ms') AS INTEGER)
                    ELSE NULL END
            WHERE id = (
                SELECT id FROM commands WHERE status = 'PENDING' ORDER BY created_at ASC LIMIT 1
            )
            RETURNING id, command_type, payload, status, result, error, agent_id, lease_id,
                      lease_expires_at, created_at, started_at, attempt, scheduled_end_at
            "#,
        )
        .bind(&req.agent_id)
        .bind(&req.lease_id)
        .bind(lease_expires_at)
        .bind(req.now)
        .bind(req.now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(row_to_record).transpose()
    }

    async fn heartbeat(
        &self,
        command_id: &str,
        agent_id: &str,
        lease_id: &str,
        extend_ms: i64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE commands
            SET lease_expires_at = ?
            WHERE id = ? AND status = 'RUNNING' AND agent_id = ? AND lease_id = ?
            "#,
        )
        .bind(now + extend_ms)
        .bind(command_id)
        .bind(agent_id)
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(
        &self,
        command_id: &str,
        agent_id: &str,
        lease_id: &str,
        result: serde_json::Value,
    ) -> Result<bool, StoreError> {
        let result_str =
            serde_json::to_string(&result).map_err(|err| StoreError::Backend(err.into()))?;

        let outcome = sqlx::query(
            r#"
            UPDATE commands
            SET status = 'COMPLETED',
                result = ?,
                lease_expires_at = NULL
            WHERE id = ? AND status = 'RUNNING' AND agent_id = ? AND lease_id = ?
            "#,
        )
        .bind(&result_str)
        .bind(command_id)
        .bind(agent_id)
        .bind(lease_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn fail(&self, req: FailCommand<'_>) -> Result<bool, StoreError> {
        let result_str = match &req.result {
            Some(value) => {
                Some(serde_json::to_string(value).map_err(|err| StoreError::Backend(err.into()))?)
            }
            None => None,
        };

        let outcome = sqlx::query(
            r#"
            UPDATE commands
            SET status = 'FAILED',
                error = ?,
                result = ?,
                lease_expires_at = NULL
            WHERE id = ? AND status = 'RUNNING' AND agent_id = ? AND lease_id = ?
            "#,
        )
        .bind(req.error)
        .bind(result_str)
        .bind(req.command_id)
        .bind(req.agent_id)
        .bind(req.lease_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn reset_expired_leases(&self, now: i64) -> Result<u64, StoreError> {
        let outcome = sqlx::query(
            r#"
            UPDATE commands
            SET status = 'PENDING',
                agent_id = NULL,
                lease_id = NULL,
                lease_expires_at = NULL,
                started_at = NULL,
                scheduled_end_at = NULL
            WHERE status = 'RUNNING' AND lease_expires_at <= ?
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let reset = outcome.rows_affected();
        if reset > 0 {
            tracing::info!(reset, "reset expired leases back to PENDING");
        }
        Ok(reset)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<CommandRecord, StoreError> {
    let command_type_raw: String = row.try_get("command_type").map_err(db_err)?;
    let command_type = CommandType::parse(&command_type_raw)
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("unknown command_type in row")))?;

    let status_raw: String = row.try_get("status").map_err(db_err)?;
    let status = match status_raw.as_str() {
        "PENDING" => CommandStatus::Pending,
        "RUNNING" => CommandStatus::Running,
        "COMPLETED" => CommandStatus::Completed,
        "FAILED" => CommandStatus::Failed,
        other => {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "unknown status in row: {other}"
            )))
        }
    };

    let payload_raw: String = row.try_get("payload").map_err(db_err)?;
    let payload: serde_json::Value =
        serde_json::from_str(&payload_raw).map_err(|err| StoreError::Backend(err.into()))?;

    let result_raw: Option<String> = row.try_get("result").map_err(db_err)?;
    let result = result_raw
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|err: serde_json::Error| StoreError::Backend(err.into()))?;

    Ok(CommandRecord {
        id: row.try_get("id").map_err(db_err)?,
        command_type,
        payload,
        status,
        result,
        error: row.try_get("error").map_err(db_err)?,
        agent_id: row.try_get("agent_id").map_err(db_err)?,
        lease_id: row.try_get("lease_id").map_err(db_err)?,
        lease_expires_at: row.try_get("lease_expires_at").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        started_at: row.try_get("started_at").map_err(db_err)?,
        attempt: row.try_get("attempt").map_err(db_err)?,
        scheduled_end_at: row.try_get("scheduled_end_at").map_err(db_err)?,
    })
}

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.into())
}

/// Validate a raw create request's payload against its declared type,
/// returning the canonical JSON to persist. Kept here too (alongside
/// `CommandPayload::validate` in `command-core`) so this crate's own tests
/// can build valid rows without depending on the server crate.
pub fn validate_payload(
    command_type: CommandType,
    raw: serde_json::Value,
) -> Result<serde_json::Value, command_core::ValidationError> {
    let payload = CommandPayload::validate(command_type, &raw)?;
    Ok(serde_json::to_value(payload).expect("CommandPayload always serializes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use command_core::ids::{new_command_id, new_lease_id};

    async fn test_store() -> SqliteCommandStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteCommandStore::from_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = test_store().await;
        let id = new_command_id();
        let record = store
            .create(CreateCommand {
                id: id.clone(),
                command_type: CommandType::Delay,
                payload: serde_json::json!({"ms": 500}),
                created_at: 1000,
            })
            .await
            .unwrap();
        assert_eq!(record.status, CommandStatus::Pending);
        assert_eq!(record.attempt, 0);

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.payload, serde_json::json!({"ms": 500}));
    }

    #[tokio::test]
    async fn create_duplicate_id_conflicts() {
        let store = test_store().await;
        let id = new_command_id();
        let make = || CreateCommand {
            id: id.clone(),
            command_type: CommandType::Delay,
            payload: serde_json::json!({"ms": 0}),
            created_at: 0,
        };
        store.create(make()).await.unwrap();
        let err = store.create(make()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn claim_sets_lease_and_scheduled_end_at() {
        let store = test_store().await;
        let id = new_command_id();
        store
            .create(CreateCommand {
                id: id.clone(),
                command_type: CommandType::Delay,
                payload: serde_json::json!({"ms": 500}),
                created_at: 1000,
            })
            .await
            .unwrap();

        let claimed = store
            .claim(ClaimCommand {
                agent_id: "agent-1".into(),
                lease_id: new_lease_id(),
                max_lease_ms: 30_000,
                now: 2000,
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(claimed.status, CommandStatus::Running);
        assert_eq!(claimed.started_at, Some(2000));
        assert_eq!(claimed.lease_expires_at, Some(32_000));
        assert_eq!(claimed.scheduled_end_at, Some(2500));
        assert_eq!(claimed.attempt, 1);
    }

    #[tokio::test]
    async fn claim_returns_none_when_empty() {
        let store = test_store().await;
        let claimed = store
            .claim(ClaimCommand {
                agent_id: "agent-1".into(),
                lease_id: new_lease_id(),
                max_lease_ms: 30_000,
                now: 0,
            })
            .await
            .unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn heartbeat_fails_on_stale_lease() {
        let store = test_store().await;
        let id = new_command_id();
        store
            .create(CreateCommand {
                id: id.clone(),
                command_type: CommandType::Delay,
                payload: serde_json::json!({"ms": 0}),
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
            .heartbeat(&id, "a1", "wrong-lease", 1000, 10)
            .await
            .unwrap());
        assert!(store.heartbeat(&id, "a1", "l1", 1000, 10).await.unwrap());
    }

    #[tokio::test]
    async fn complete_is_exclusive_and_terminal() {
        let store = test_store().await;
        let id = new_command_id();
        store
            .create(CreateCommand {
                id: id.clone(),
                command_type: CommandType::Delay,
                payload: serde_json::json!({"ms": 0}),
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

        let result = serde_json::json!({"ok": true, "tookMs": 0});
        assert!(store
            .complete(&id, "a1", "l1", result.clone())
            .await
            .unwrap());
        // Second complete against the same lease no longer matches: status isn't RUNNING.
        assert!(!store.complete(&id, "a1", "l1", result).await.unwrap());

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, CommandStatus::Completed);
        assert!(record.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn reset_expired_leases_clears_fields_but_keeps_attempt() {
        let store = test_store().await;
        let id = new_command_id();
        store
            .create(CreateCommand {
                id: id.clone(),
                command_type: CommandType::Delay,
                payload: serde_json::json!({"ms": 0}),
                created_at: 0,
            })
            .await
            .unwrap();
        store
            .claim(ClaimCommand {
                agent_id: "a1".into(),
                lease_id: "l1".into(),
                max_lease_ms: 100,
                now: 0,
            })
            .await
            .unwrap();

        let reset = store.reset_expired_leases(200).await.unwrap();
        assert_eq!(reset, 1);

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, CommandStatus::Pending);
        assert!(record.agent_id.is_none());
        assert!(record.lease_id.is_none());
        assert!(record.lease_expires_at.is_none());
        assert_eq!(record.attempt, 1, "attempt must not be reset");

        let reset_again = store.reset_expired_leases(200).await.unwrap();
        assert_eq!(reset_again, 0);
    }

    #[tokio::test]
    async fn atomic_claim_under_concurrency() {
        let store = test_store().await;
        for _ in 0..5 {
            store
                .create(CreateCommand {
                    id: new_command_id(),
                    command_type: CommandType::Delay,
                    payload: serde_json::json!({"ms": 0}),
                    created_at: 0,
                })
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim(ClaimCommand {
                        agent_id: format!("agent-{i}"),
                        lease_id: new_lease_id(),
                        max_lease_ms: 30_000,
                        now: 0,
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut claimed_ids = std::collections::HashSet::new();
        for handle in handles {
            if let Some(record) = handle.await.unwrap() {
                assert!(claimed_ids.insert(record.id), "claimed the same row twice");
            }
        }
        assert_eq!(claimed_ids.len(), 5);
    }
}
