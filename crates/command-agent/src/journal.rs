//! The journal manager: single-writer, crash-atomic persistence of one
//! small JSON file per agent (spec.md §3 "Agent Journal", §4.6).
//!
//! The write-temp-then-rename protocol is the same pattern this corpus
//! uses for lease files: a reader never observes a partially written file
//! because `rename` is the linearization point.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use command_core::CommandType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalStage {
    Claimed,
    InProgress,
    ResultSaved,
}

/// The on-disk record of one agent's in-flight command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentJournal {
    pub command_id: String,
    pub lease_id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub started_at: i64,
    pub scheduled_end_at: Option<i64>,
    pub http_snapshot: Option<serde_json::Value>,
    pub stage: JournalStage,
}

impl AgentJournal {
    pub fn claimed(
        command_id: String,
        lease_id: String,
        command_type: CommandType,
        started_at: i64,
        scheduled_end_at: Option<i64>,
    ) -> Self {
        Self {
            command_id,
            lease_id,
            command_type,
            started_at,
            scheduled_end_at,
            http_snapshot: None,
            stage: JournalStage::Claimed,
        }
    }
}

/// Owns one agent's journal file path and the atomic write protocol.
pub struct JournalManager {
    path: PathBuf,
}

impl JournalManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the journal, or `None` if absent or malformed. A malformed file
    /// is logged and treated as absent rather than propagated as an error,
    /// per spec.md §4.6.
    pub async fn load(&self) -> Option<AgentJournal> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(error = %err, path = %self.path.display(), "failed to read journal file");
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(journal) => Some(journal),
            Err(err) => {
                tracing::warn!(error = %err, path = %self.path.display(), "journal file is corrupt, treating as absent");
                None
            }
        }
    }

    /// Atomically persist `journal`: write to a sibling `.tmp` file, then
    /// rename over the real path. Creates the parent directory on first
    /// use if it doesn't exist yet.
    pub async fn save(&self, journal: &AgentJournal) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = tmp_path_for(&self.path);
        let body = serde_json::to_vec_pretty(journal)?;
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Best-effort delete: a missing file is not an error.
    pub async fn delete(&self) {
        if let Err(err) = tokio::fs::remove_file(&self.path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %err, path = %self.path.display(), "failed to delete journal file");
            }
        }
    }

    pub async fn create_claimed(&self, journal: AgentJournal) -> anyhow::Result<AgentJournal> {
        self.save(&journal).await?;
        Ok(journal)
    }

    pub async fn update_stage(
        &self,
        mut journal: AgentJournal,
        stage: JournalStage,
    ) -> anyhow::Result<AgentJournal> {
        journal.stage = stage;
        self.save(&journal).await?;
        Ok(journal)
    }

    pub async fn update_http_snapshot(
        &self,
        mut journal: AgentJournal,
        snapshot: serde_json::Value,
    ) -> anyhow::Result<AgentJournal> {
        journal.http_snapshot = Some(snapshot);
        journal.stage = JournalStage::ResultSaved;
        self.save(&journal).await?;
        Ok(journal)
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let suffix: u64 = fastrand::u64(..);
    let file_name = path
        .file_name()
        .map(|name| format!("{}.{suffix:x}.tmp", name.to_string_lossy()))
        .unwrap_or_else(|| format!("journal.{suffix:x}.tmp"));
    path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JournalManager::new(dir.path().join("agent-1.json"));
        let journal = AgentJournal::claimed(
            "c1".into(),
            "l1".into(),
            CommandType::Delay,
            1000,
            Some(1500),
        );
        manager.save(&journal).await.unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.command_id, "c1");
        assert_eq!(loaded.stage, JournalStage::Claimed);
    }

    #[tokio::test]
    async fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JournalManager::new(dir.path().join("nope.json"));
        assert!(manager.load().await.is_none());
    }

    #[tokio::test]
    async fn load_returns_none_on_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-1.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let manager = JournalManager::new(path);
        assert!(manager.load().await.is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JournalManager::new(dir.path().join("agent-1.json"));
        manager.delete().await;
        manager.delete().await;
    }

    #[tokio::test]
    async fn creates_parent_directory_on_first_save() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested/state");
        let manager = JournalManager::new(nested.join("agent-1.json"));
        let journal = AgentJournal::claimed("c1".into(), "l1".into(), CommandType::Delay, 0, None);
        manager.save(&journal).await.unwrap();
        assert!(nested.join("agent-1.json").exists());
    }

    #[tokio::test]
    async fn update_http_snapshot_also_advances_stage() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JournalManager::new(dir.path().join("agent-1.json"));
        let journal = AgentJournal::claimed(
            "c1".into(),
            "l1".into(),
            CommandType::HttpGetJson,
            0,
            None,
        );
        let journal = manager
            .update_stage(journal, JournalStage::InProgress)
            .await
            .unwrap();
        let journal = manager
            .update_http_snapshot(journal, serde_json::json!({"status": 200}))
            .await
            .unwrap();
        assert_eq!(journal.stage, JournalStage::ResultSaved);
        assert_eq!(journal.http_snapshot, Some(serde_json::json!({"status": 200})));
    }
}
