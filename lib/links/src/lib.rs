//! Materializes issue relationships as a deterministic graph of
//! relative symlinks under `projects/<PK>/relationships/`.
//!
//! Targets are relative to the link itself, so the tree stays
//! portable when the repository moves. Per-link failures are
//! collected and reported; the issue file and its commit are the
//! primary artefacts and are never aborted by a bad link.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use ticketry_client::entities::issue::Issue;
use ticketry_client::error::{Error, ErrorKind, Result};
use tracing::debug;

/// Relationship kinds that always have a directory, created
/// up front with mode 0755.
const BASE_RELATIONSHIP_DIRS: [&str; 6] =
  ["epic", "subtasks", "parent", "blocks", "clones", "documents"];

#[derive(Debug, Clone)]
pub struct LinkManager {
  extension: String,
}

impl Default for LinkManager {
  fn default() -> Self {
    Self::new()
  }
}

/// Outcome of materializing one issue's relationships.
#[derive(Debug, Default)]
pub struct LinkReport {
  pub created: Vec<PathBuf>,
  pub errors: Vec<Error>,
}

impl LinkManager {
  pub fn new() -> Self {
    Self {
      extension: String::from("yaml"),
    }
  }

  fn relationships_dir(
    &self,
    repo_root: &Path,
    project_key: &str,
  ) -> PathBuf {
    repo_root
      .join("projects")
      .join(project_key)
      .join("relationships")
  }

  /// Pre-create the relationship tree for a project.
  pub async fn ensure_relationship_dirs(
    &self,
    repo_root: &Path,
    project_key: &str,
  ) -> Result<()> {
    let base = self.relationships_dir(repo_root, project_key);
    for kind in BASE_RELATIONSHIP_DIRS {
      make_dir_0755(&base.join(kind)).await?;
    }
    Ok(())
  }

  /// Create or refresh every cross-reference for `issue`.
  pub async fn create_issue_links(
    &self,
    repo_root: &Path,
    issue: &Issue,
  ) -> LinkReport {
    let mut report = LinkReport::default();
    let project_key = issue.project_key().to_string();
    if let Err(e) = self
      .ensure_relationship_dirs(repo_root, &project_key)
      .await
    {
      report.errors.push(e);
      return report;
    }
    let base = self.relationships_dir(repo_root, &project_key);
    let rel = issue.relationships();

    if let Some(epic) = &rel.epic_link {
      self
        .place_link(
          &base.join("epic").join(&issue.key),
          &format!("../../issues/{epic}.{}", self.extension),
          &mut report,
        )
        .await;
    }
    if let Some(parent) = &rel.parent_issue {
      self
        .place_link(
          &base.join("parent").join(&issue.key),
          &format!("../../issues/{parent}.{}", self.extension),
          &mut report,
        )
        .await;
    }
    for subtask in &rel.subtasks {
      let dir = base.join("subtasks").join(&issue.key);
      if let Err(e) = make_dir_0755(&dir).await {
        report.errors.push(e);
        continue;
      }
      self
        .place_link(
          &dir.join(subtask),
          &format!("../../../issues/{subtask}.{}", self.extension),
          &mut report,
        )
        .await;
    }
    for link in &rel.issue_links {
      let dir = base
        .join(link.link_type.to_lowercase())
        .join(link.direction.to_string());
      if let Err(e) = make_dir_0755(&dir).await {
        report.errors.push(e);
        continue;
      }
      self
        .place_link(
          &dir.join(&issue.key),
          &format!(
            "../../../issues/{}.{}",
            link.issue_key, self.extension
          ),
          &mut report,
        )
        .await;
    }
    report
  }

  /// Create the symlink at `path` pointing at `target`,
  /// atomically replacing any existing entry.
  async fn place_link(
    &self,
    path: &Path,
    target: &str,
    report: &mut LinkReport,
  ) {
    match create_link(path, target).await {
      Ok(()) => report.created.push(path.to_path_buf()),
      Err(e) => report.errors.push(e),
    }
  }

  /// A valid link exists, is a symlink, and its target resolves.
  pub async fn validate_link(&self, path: &Path) -> Result<()> {
    let meta = tokio::fs::symlink_metadata(path)
      .await
      .map_err(|e| {
        Error::new(
          ErrorKind::BrokenLink,
          format!("No cross-reference at {path:?}"),
        )
        .with_cause(e)
      })?;
    if !meta.file_type().is_symlink() {
      return Err(Error::new(
        ErrorKind::BrokenLink,
        format!("{path:?} is not a cross-reference"),
      ));
    }
    // metadata follows the link; failure means a dangling target.
    tokio::fs::metadata(path).await.map_err(|e| {
      Error::new(
        ErrorKind::BrokenLink,
        format!("Cross-reference {path:?} does not resolve"),
      )
      .with_cause(e)
    })?;
    Ok(())
  }

  /// Walk the relationship tree and remove exactly the entries
  /// whose targets do not resolve. Idempotent.
  pub async fn cleanup_broken_links(
    &self,
    repo_root: &Path,
    project_key: &str,
  ) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let mut stack =
      vec![self.relationships_dir(repo_root, project_key)];
    while let Some(dir) = stack.pop() {
      let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        // A project without relationships is not an error.
        Err(_) => continue,
      };
      while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Ok(meta) =
          tokio::fs::symlink_metadata(&path).await
        else {
          continue;
        };
        if meta.file_type().is_dir() {
          stack.push(path);
        } else if meta.file_type().is_symlink()
          && tokio::fs::metadata(&path).await.is_err()
        {
          tokio::fs::remove_file(&path).await.map_err(|e| {
            Error::new(
              ErrorKind::FilesystemError,
              format!("Failed to remove broken link {path:?}"),
            )
            .with_cause(e)
          })?;
          debug!("removed broken link {path:?}");
          removed.push(path);
        }
      }
    }
    Ok(removed)
  }
}

async fn make_dir_0755(dir: &Path) -> Result<()> {
  tokio::fs::create_dir_all(dir).await.map_err(|e| {
    Error::new(
      ErrorKind::LinkCreationError,
      format!("Failed to create {dir:?}"),
    )
    .with_cause(e)
  })?;
  tokio::fs::set_permissions(
    dir,
    std::fs::Permissions::from_mode(0o755),
  )
  .await
  .map_err(|e| {
    Error::new(
      ErrorKind::LinkCreationError,
      format!("Failed to set permissions on {dir:?}"),
    )
    .with_cause(e)
  })
}

async fn create_link(path: &Path, target: &str) -> Result<()> {
  let dir = path.parent().ok_or_else(|| {
    Error::new(
      ErrorKind::LinkCreationError,
      format!("Link path {path:?} has no parent"),
    )
  })?;
  let file_name = path
    .file_name()
    .and_then(|name| name.to_str())
    .ok_or_else(|| {
      Error::new(
        ErrorKind::LinkCreationError,
        format!("Link path {path:?} has no file name"),
      )
    })?;
  // Create under a temp name, then rename over: replacement of
  // an existing entry is atomic.
  let tmp = dir.join(format!(".{file_name}.tmp"));
  tokio::fs::remove_file(&tmp).await.ok();
  tokio::fs::symlink(target, &tmp).await.map_err(|e| {
    Error::new(
      ErrorKind::LinkCreationError,
      format!("Failed to create link {path:?} -> {target}"),
    )
    .with_cause(e)
  })?;
  if let Err(e) = tokio::fs::rename(&tmp, path).await {
    tokio::fs::remove_file(&tmp).await.ok();
    return Err(
      Error::new(
        ErrorKind::LinkCreationError,
        format!("Failed to move link {path:?} into place"),
      )
      .with_cause(e),
    );
  }
  Ok(())
}
