//! The heartbeat task (spec.md §4.5): runs concurrently with executor work,
//! extending the current lease on a fixed interval and flipping a shared
//! `lease_valid` flag to false the moment the server rejects it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::client::{ReportOutcome, ServerClient};
use crate::executor::LeaseCheck;

/// Handle to a running (or stopped) heartbeat task. Cloning shares the
/// same underlying flag and task handle.
pub struct Heartbeat {
    lease_valid: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Spawn the heartbeat task for one claimed command's lease.
    pub fn spawn(
        client: ServerClient,
        command_id: String,
        agent_id: String,
        lease_id: String,
        interval_ms: i64,
        extend_ms: i64,
    ) -> Self {
        let lease_valid = Arc::new(AtomicBool::new(true));
        let flag = lease_valid.clone();

        let handle = tokio::spawn(async move {
            let interval = std::time::Duration::from_millis(interval_ms.max(0) as u64);
            loop {
                tokio::time::sleep(interval).await;
                if !flag.load(Ordering::SeqCst) {
                    return;
                }
                match client
                    .heartbeat(&command_id, &agent_id, &lease_id, extend_ms)
                    .await
                {
                    ReportOutcome::Accepted => continue,
                    ReportOutcome::LeaseInvalid | ReportOutcome::Failed => {
                        flag.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        });

        Self { lease_valid, handle }
    }

    /// Cheap, many-readers query of the current lease's validity.
    pub fn lease_valid(&self) -> bool {
        self.lease_valid.load(Ordering::SeqCst)
    }

    /// Idempotent: safe to call more than once, and safe to call after the
    /// task has already stopped itself.
    pub async fn stop(self) {
        self.lease_valid.store(false, Ordering::SeqCst);
        self.handle.abort();
        let _ = self.handle.await;
    }
}

impl LeaseCheck for Heartbeat {
    fn is_valid(&self) -> bool {
        self.lease_valid()
    }
}
