//! Atomic persistence and planning over the per-repository
//! sync-state document.

use std::path::{Path, PathBuf};

use chrono::Utc;
use ticketry_client::entities::state::{
  MAX_HISTORY_ENTRIES, SyncState,
};
use ticketry_client::error::{Error, ErrorKind, Result};
use tracing::debug;

mod plan;
mod stats;
mod validate;

pub use plan::{
  ChangedIssuesOptions, get_changed_issues, should_sync_issue,
  should_sync_issue_snapshot,
};
pub use stats::update_statistics;
pub use validate::{
  RecoverOptions, RecoveryAction, RecoveryReport, ValidationReport,
};

pub const STATE_FILE: &str = ".sync-state.yaml";
pub const BACKUP_FILE: &str = ".sync-state.backup.yaml";

#[derive(Debug, Clone, Default)]
pub struct StateStore;

impl StateStore {
  pub fn new() -> Self {
    Self
  }

  pub fn state_path(&self, repo_path: &Path) -> PathBuf {
    repo_path.join(STATE_FILE)
  }

  pub fn backup_path(&self, repo_path: &Path) -> PathBuf {
    repo_path.join(BACKUP_FILE)
  }

  /// Read and decode the state document. `Ok(None)` when the
  /// repository has never been synced; `state_corrupt` when the
  /// document exists but does not decode.
  pub async fn load_state(
    &self,
    repo_path: &Path,
  ) -> Result<Option<SyncState>> {
    let path = self.state_path(repo_path);
    let body = match tokio::fs::read_to_string(&path).await {
      Ok(body) => body,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Ok(None);
      }
      Err(e) => {
        return Err(
          Error::new(
            ErrorKind::FilesystemError,
            format!("Failed to read {path:?}"),
          )
          .with_cause(e),
        );
      }
    };
    let state: SyncState =
      serde_yaml_ng::from_str(&body).map_err(|e| {
        Error::new(
          ErrorKind::StateCorrupt,
          format!("State document {path:?} does not decode"),
        )
        .with_cause(e)
      })?;
    Ok(Some(state))
  }

  /// Persist the document atomically: serialize to a sibling
  /// temp file, then rename over the canonical path. History is
  /// truncated to the most recent entries first.
  pub async fn save_state(
    &self,
    repo_path: &Path,
    state: &mut SyncState,
  ) -> Result<()> {
    truncate_history(state);
    state.updated_at = Utc::now();

    let path = self.state_path(repo_path);
    let body = serde_yaml_ng::to_string(state).map_err(|e| {
      Error::new(
        ErrorKind::SerializationError,
        "Failed to serialize state document",
      )
      .with_cause(e)
    })?;
    let tmp = repo_path.join(format!("{STATE_FILE}.tmp"));
    tokio::fs::write(&tmp, &body).await.map_err(|e| {
      Error::new(
        ErrorKind::FilesystemError,
        format!("Failed to write {tmp:?}"),
      )
      .with_cause(e)
    })?;
    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
      tokio::fs::remove_file(&tmp).await.ok();
      return Err(
        Error::new(
          ErrorKind::FilesystemError,
          format!("Failed to move {tmp:?} over {path:?}"),
        )
        .with_cause(e),
      );
    }
    debug!("saved state document at {path:?}");
    Ok(())
  }

  /// Copy the canonical document to its `.backup` sibling.
  pub async fn backup_state(&self, repo_path: &Path) -> Result<()> {
    let path = self.state_path(repo_path);
    let backup = self.backup_path(repo_path);
    tokio::fs::copy(&path, &backup).await.map_err(|e| {
      Error::new(
        ErrorKind::FilesystemError,
        format!("Failed to back up {path:?}"),
      )
      .with_cause(e)
    })?;
    Ok(())
  }

  /// Copy the `.backup` sibling back over the canonical document.
  pub async fn restore_state(&self, repo_path: &Path) -> Result<()> {
    let path = self.state_path(repo_path);
    let backup = self.backup_path(repo_path);
    tokio::fs::copy(&backup, &path).await.map_err(|e| {
      Error::new(
        ErrorKind::FilesystemError,
        format!("Failed to restore from {backup:?}"),
      )
      .with_cause(e)
    })?;
    Ok(())
  }
}

/// Keep the most recent MAX_HISTORY_ENTRIES by start time.
fn truncate_history(state: &mut SyncState) {
  if state.history.len() > MAX_HISTORY_ENTRIES {
    state
      .history
      .sort_by_key(|operation| operation.start_time);
    let excess = state.history.len() - MAX_HISTORY_ENTRIES;
    state.history.drain(..excess);
  }
}
