use std::path::Path;

use async_trait::async_trait;
use command::Exec;
use ticketry_client::entities::issue::Issue;
use ticketry_client::error::{ErrorKind, Result};

mod memory;
mod message;
mod shell;

pub use memory::{MemoryRepository, RecordedCommit};
pub use message::{commit_message, commit_subject, commit_type};
pub use shell::GitRepository;

/// Capability set over the local revision-control repository.
/// One production variant shells out to `git`; the in-memory
/// variant records commits for tests.
#[async_trait]
pub trait Repository: Send + Sync {
  /// Create a repository at `path` if none exists. Idempotent.
  async fn initialize(&self, path: &Path) -> Result<()>;

  /// Fail with `dirty_working_tree` when any uncommitted or
  /// untracked entry is present.
  async fn validate_working_tree(&self, path: &Path) -> Result<()>;

  /// Stage exactly `file_path` (relative to the repository root)
  /// and create one commit for `issue`. Returns the short hash.
  async fn commit_issue_file(
    &self,
    path: &Path,
    file_path: &Path,
    issue: &Issue,
  ) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatestCommit {
  pub hash: String,
  pub message: String,
}

pub async fn get_commit_hash_info(
  repo_dir: &Path,
) -> Result<LatestCommit> {
  let hash = Exec::new("git")
    .args(["rev-parse", "--short", "HEAD"])
    .current_dir(repo_dir)
    .output()
    .await?
    .require_success(
      ErrorKind::GitOperationError,
      "Failed to get short hash",
    )?;
  let message = Exec::new("git")
    .args(["log", "-1", "--pretty=%B"])
    .current_dir(repo_dir)
    .output()
    .await?
    .require_success(
      ErrorKind::GitOperationError,
      "Failed to get commit message",
    )?;
  Ok(LatestCommit {
    hash: hash.stdout.trim().to_string(),
    message: message.stdout.trim().to_string(),
  })
}
