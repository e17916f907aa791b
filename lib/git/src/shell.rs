use std::path::Path;

use async_trait::async_trait;
use command::Exec;
use ticketry_client::entities::issue::Issue;
use ticketry_client::error::{Error, ErrorKind, Result};
use tracing::debug;

use crate::{Repository, message::commit_message};

/// Untracked files the sync itself maintains in the repo root.
const SYNC_ARTIFACTS: [&str; 2] =
  [".sync-state.yaml", ".sync-state.backup.yaml"];

/// Production repository backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitRepository {
  author_name: String,
  author_email: String,
}

impl GitRepository {
  pub fn new(
    author_name: impl Into<String>,
    author_email: impl Into<String>,
  ) -> Self {
    Self {
      author_name: author_name.into(),
      author_email: author_email.into(),
    }
  }

  fn git(&self, repo: &Path) -> Exec {
    Exec::new("git").current_dir(repo)
  }

  /// Commits are stamped with the configured identity no matter
  /// what the host's git config says.
  fn with_identity(&self, exec: Exec) -> Exec {
    exec
      .env("GIT_AUTHOR_NAME", &self.author_name)
      .env("GIT_AUTHOR_EMAIL", &self.author_email)
      .env("GIT_COMMITTER_NAME", &self.author_name)
      .env("GIT_COMMITTER_EMAIL", &self.author_email)
  }
}

#[async_trait]
impl Repository for GitRepository {
  async fn initialize(&self, path: &Path) -> Result<()> {
    if path.join(".git").exists() {
      return Ok(());
    }
    tokio::fs::create_dir_all(path).await.map_err(|e| {
      Error::new(
        ErrorKind::FilesystemError,
        format!("Failed to create {path:?}"),
      )
      .with_cause(e)
    })?;
    self
      .git(path)
      .args(["init", "--quiet"])
      .output()
      .await?
      .require_success(
        ErrorKind::GitOperationError,
        "git init failed",
      )?;
    debug!("initialized repository at {path:?}");
    Ok(())
  }

  async fn validate_working_tree(&self, path: &Path) -> Result<()> {
    ensure_repository(path)?;
    let status = self
      .git(path)
      .args(["status", "--porcelain"])
      .output()
      .await?
      .require_success(
        ErrorKind::GitOperationError,
        "git status failed",
      )?;
    // The sync's own state documents live untracked in the
    // repository root and never count as dirt.
    let dirty: Vec<&str> = status
      .stdout
      .lines()
      .filter(|line| {
        let entry = line.get(3..).unwrap_or("").trim();
        !SYNC_ARTIFACTS.contains(&entry)
      })
      .collect();
    if dirty.is_empty() {
      Ok(())
    } else {
      Err(
        Error::new(
          ErrorKind::DirtyWorkingTree,
          format!(
            "Working tree at {path:?} has uncommitted changes"
          ),
        )
        .with_context("entries", dirty.join("\n")),
      )
    }
  }

  async fn commit_issue_file(
    &self,
    path: &Path,
    file_path: &Path,
    issue: &Issue,
  ) -> Result<String> {
    if file_path.as_os_str().is_empty()
      || file_path.is_absolute()
    {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "Commit path must be relative to the repository, got {file_path:?}"
        ),
      ));
    }
    ensure_repository(path)?;
    if !path.join(file_path).exists() {
      return Err(Error::new(
        ErrorKind::FilesystemError,
        format!("Nothing to commit at {file_path:?}"),
      ));
    }
    let relative = file_path.to_str().ok_or_else(|| {
      Error::new(
        ErrorKind::InvalidInput,
        format!("Path {file_path:?} is not valid UTF-8"),
      )
    })?;

    self
      .git(path)
      .args(["add", "--", relative])
      .output()
      .await?
      .require_success(
        ErrorKind::GitOperationError,
        "git add failed",
      )?;

    // The message file lives under .git so it can never
    // show up as an untracked entry.
    let message_path = path.join(".git/TICKETRY_COMMIT_MSG");
    tokio::fs::write(&message_path, commit_message(issue))
      .await
      .map_err(|e| {
        Error::new(
          ErrorKind::FilesystemError,
          "Failed to write commit message file",
        )
        .with_cause(e)
      })?;

    let commit = self
      .with_identity(self.git(path))
      .args([
        "commit",
        "--quiet",
        "--no-verify",
        "-F",
        ".git/TICKETRY_COMMIT_MSG",
      ])
      .output()
      .await;
    tokio::fs::remove_file(&message_path).await.ok();
    commit?.require_success(
      ErrorKind::GitOperationError,
      "git commit failed",
    )?;

    let head = self
      .git(path)
      .args(["rev-parse", "--short", "HEAD"])
      .output()
      .await?
      .require_success(
        ErrorKind::GitOperationError,
        "Failed to read HEAD",
      )?;
    Ok(head.stdout.trim().to_string())
  }
}

fn ensure_repository(path: &Path) -> Result<()> {
  if path.join(".git").exists() {
    Ok(())
  } else {
    Err(Error::new(
      ErrorKind::RepositoryNotFound,
      format!("No repository at {path:?}"),
    ))
  }
}
