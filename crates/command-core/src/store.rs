//! The `CommandStore` trait: the exact set of primitives the control server
//! needs, each a single serializable transaction.
//!
//! Implementers only need to get the atomicity of `claim` and the
//! conditional-update semantics of `heartbeat`/`complete`/`fail` right;
//! everything else in the server falls out of these eight operations.

use async_trait::async_trait;

use crate::command::{CommandRecord, CommandType};
use crate::error::StoreError;

/// Arguments for [`CommandStore::create`].
pub struct CreateCommand {
    pub id: String,
    pub command_type: CommandType,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

/// Arguments for [`CommandStore::claim`].
pub struct ClaimCommand {
    pub agent_id: String,
    pub lease_id: String,
    pub max_lease_ms: i64,
    pub now: i64,
}

/// Arguments for [`CommandStore::fail`].
pub struct FailCommand<'a> {
    pub command_id: &'a str,
    pub agent_id: &'a str,
    pub lease_id: &'a str,
    pub error: &'a str,
    pub result: Option<serde_json::Value>,
}

#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Insert one PENDING row. Errs with [`StoreError::Conflict`] if `id`
    /// already exists.
    async fn create(&self, req: CreateCommand) -> Result<CommandRecord, StoreError>;

    /// Fetch a command by id, or `None` if it does not exist.
    async fn get(&self, id: &str) -> Result<Option<CommandRecord>, StoreError>;

    /// Select the oldest PENDING row (by `created_at`) and atomically
    /// transition it to RUNNING, minting a new lease and incrementing
    /// `attempt`. Returns `None` when no PENDING row exists. Under N
    /// concurrent callers racing the same row, exactly one succeeds.
    async fn claim(&self, req: ClaimCommand) -> Result<Option<CommandRecord>, StoreError>;

    /// Extend the lease on a RUNNING row, conditional on `agent_id` and
    /// `lease_id` matching the current holder. Returns whether a row
    /// changed; `false` means the lease is stale (already reassigned,
    /// completed, or failed).
    async fn heartbeat(
        &self,
        command_id: &str,
        agent_id: &str,
        lease_id: &str,
        extend_ms: i64,
        now: i64,
    ) -> Result<bool, StoreError>;

    /// Transition RUNNING -> COMPLETED, conditional on identity match.
    /// Returns whether a row changed.
    async fn complete(
        &self,
        command_id: &str,
        agent_id: &str,
        lease_id: &str,
        result: serde_json::Value,
    ) -> Result<bool, StoreError>;

    /// Transition RUNNING -> FAILED, conditional on identity match. Returns
    /// whether a row changed.
    async fn fail(&self, req: FailCommand<'_>) -> Result<bool, StoreError>;

    /// Reset every RUNNING row whose lease has expired back to PENDING,
    /// clearing lease fields but not `attempt`. Returns the number reset.
    async fn reset_expired_leases(&self, now: i64) -> Result<u64, StoreError>;

    /// Release any held resources (connection pool, file handles).
    async fn close(&self);
}
