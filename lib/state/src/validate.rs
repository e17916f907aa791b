//! Cross-checks between the state document and the tree on disk,
//! plus the guided recovery path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::Display;
use ticketry_client::entities::state::{SyncState, SyncStatus};
use ticketry_client::error::Result;
use tracing::{info, warn};

use crate::StateStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
  /// Tracked issues whose file is gone.
  pub missing_issues: Vec<String>,
  /// Issue documents on disk that no state entry tracks.
  pub orphaned_files: Vec<PathBuf>,
  /// Tracked issues whose file was modified outside the sync.
  pub checksum_warnings: Vec<String>,
}

impl ValidationReport {
  pub fn is_clean(&self) -> bool {
    self.missing_issues.is_empty()
      && self.orphaned_files.is_empty()
      && self.checksum_warnings.is_empty()
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryAction {
  /// Reset sync markers so the next run refetches everything.
  FullResync,
  /// Delete untracked issue documents from disk.
  RemoveOrphans,
  /// Drop state entries whose files are missing and refresh
  /// checksums for files modified outside the sync.
  RepairState,
  /// Mark drifted entries failed instead of repairing them.
  SkipCorrupted,
  /// Report only.
  ValidateOnly,
}

#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
  pub actions: Vec<RecoveryAction>,
  pub backup_first: bool,
  pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
  pub validation: ValidationReport,
  pub removed_states: Vec<String>,
  pub removed_files: Vec<PathBuf>,
  pub repaired: Vec<String>,
  pub reset_for_resync: usize,
  pub dry_run: bool,
}

impl StateStore {
  /// Cross-check every tracked `file_path` against the disk.
  pub async fn validate_state(
    &self,
    state: &SyncState,
    repo_path: &Path,
  ) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    for (key, issue_state) in &state.issues {
      let path = repo_path.join(&issue_state.file_path);
      match tokio::fs::read(&path).await {
        Ok(body) => {
          if sha256_hex(&body) != issue_state.checksum {
            warn!(
              "{key}: {path:?} was modified outside the sync"
            );
            report.checksum_warnings.push(key.clone());
          }
        }
        Err(_) => report.missing_issues.push(key.clone()),
      }
    }

    for path in issue_documents(repo_path).await {
      let relative = path
        .strip_prefix(repo_path)
        .unwrap_or(&path)
        .to_path_buf();
      let tracked = state
        .issues
        .values()
        .any(|issue_state| issue_state.file_path == relative);
      if !tracked {
        report.orphaned_files.push(relative);
      }
    }

    Ok(report)
  }

  /// Apply the selected recovery actions. `backup_first` copies
  /// the document aside before touching anything; `dry_run`
  /// reports what would happen without writing.
  pub async fn recover_state(
    &self,
    state: &mut SyncState,
    repo_path: &Path,
    opts: &RecoverOptions,
  ) -> Result<RecoveryReport> {
    if opts.backup_first && !opts.dry_run {
      self.backup_state(repo_path).await?;
    }

    let validation = self.validate_state(state, repo_path).await?;
    let mut report = RecoveryReport {
      validation: validation.clone(),
      dry_run: opts.dry_run,
      ..Default::default()
    };

    if opts.actions.contains(&RecoveryAction::ValidateOnly) {
      return Ok(report);
    }

    if opts.actions.contains(&RecoveryAction::RemoveOrphans) {
      for relative in &validation.orphaned_files {
        if !opts.dry_run {
          tokio::fs::remove_file(repo_path.join(relative))
            .await
            .ok();
        }
        report.removed_files.push(relative.clone());
      }
    }

    if opts.actions.contains(&RecoveryAction::RepairState) {
      for key in &validation.missing_issues {
        if !opts.dry_run {
          state.remove_issue_state(key);
        }
        report.removed_states.push(key.clone());
      }
      let skip_corrupted =
        opts.actions.contains(&RecoveryAction::SkipCorrupted);
      for key in &validation.checksum_warnings {
        if opts.dry_run {
          report.repaired.push(key.clone());
          continue;
        }
        let Some(issue_state) = state.issues.get_mut(key) else {
          continue;
        };
        if skip_corrupted {
          issue_state.sync_status = SyncStatus::Failed;
          continue;
        }
        let path = repo_path.join(&issue_state.file_path);
        if let Ok(body) = tokio::fs::read(&path).await {
          issue_state.checksum = sha256_hex(&body);
          issue_state.file_size = body.len() as u64;
          report.repaired.push(key.clone());
        }
      }
    }

    if opts.actions.contains(&RecoveryAction::FullResync) {
      report.reset_for_resync = state.issues.len();
      if !opts.dry_run {
        for issue_state in state.issues.values_mut() {
          issue_state.last_synced = None;
          issue_state.sync_status = SyncStatus::Pending;
        }
      }
    }

    if !opts.dry_run {
      self.save_state(repo_path, state).await?;
      info!(
        "state recovery applied: {} orphans removed, {} states dropped",
        report.removed_files.len(),
        report.removed_states.len()
      );
    }
    Ok(report)
  }
}

/// Every `projects/<PK>/issues/*` document on disk.
async fn issue_documents(repo_path: &Path) -> Vec<PathBuf> {
  let mut documents = Vec::new();
  let projects = repo_path.join("projects");
  let Ok(mut project_entries) =
    tokio::fs::read_dir(&projects).await
  else {
    return documents;
  };
  while let Ok(Some(project)) = project_entries.next_entry().await
  {
    let issues_dir = project.path().join("issues");
    let Ok(mut issue_entries) =
      tokio::fs::read_dir(&issues_dir).await
    else {
      continue;
    };
    while let Ok(Some(issue)) = issue_entries.next_entry().await {
      let path = issue.path();
      if path.is_file() {
        documents.push(path);
      }
    }
  }
  documents
}

fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}
