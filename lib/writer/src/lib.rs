//! Serializes one issue to `projects/<PK>/issues/<KEY>.<ext>`.
//!
//! Field order is stable (declaration order on [Issue]), empty
//! optional fields are omitted, and timestamps are emitted verbatim
//! as the strings the remote returned. Files land via temp + rename
//! so an interrupted write never leaves a torn document.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use ticketry_client::entities::issue::{
  Issue, extract_project_key, valid_issue_key,
};
use ticketry_client::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone)]
pub struct FileWriter {
  extension: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenFile {
  /// Absolute path of the written document.
  pub path: PathBuf,
  /// The same path, relative to the repository root.
  pub relative_path: PathBuf,
  pub size: u64,
  /// SHA-256 of the written bytes.
  pub checksum: String,
}

impl Default for FileWriter {
  fn default() -> Self {
    Self {
      extension: String::from("yaml"),
    }
  }
}

impl FileWriter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Issue document path relative to the repository root.
  pub fn relative_issue_path(&self, key: &str) -> PathBuf {
    PathBuf::from("projects")
      .join(extract_project_key(key))
      .join("issues")
      .join(format!("{key}.{}", self.extension))
  }

  pub fn issue_path(&self, repo_root: &Path, key: &str) -> PathBuf {
    repo_root.join(self.relative_issue_path(key))
  }

  pub async fn write_issue(
    &self,
    repo_root: &Path,
    issue: &Issue,
  ) -> Result<WrittenFile> {
    if !valid_issue_key(&issue.key) {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!("'{}' is not a valid issue key", issue.key),
      ));
    }
    let relative_path = self.relative_issue_path(&issue.key);
    let path = repo_root.join(&relative_path);
    let dir = path.parent().expect("issue path always has a parent");
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
      Error::new(
        ErrorKind::FilesystemError,
        format!("Failed to create {dir:?}"),
      )
      .with_cause(e)
    })?;

    let body = serde_yaml_ng::to_string(issue).map_err(|e| {
      Error::new(
        ErrorKind::SerializationError,
        format!("Failed to serialize {}", issue.key),
      )
      .with_cause(e)
    })?;

    let tmp = path.with_extension(format!("{}.tmp", self.extension));
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
          format!("Failed to move {tmp:?} into place"),
        )
        .with_cause(e),
      );
    }

    Ok(WrittenFile {
      path,
      relative_path,
      size: body.len() as u64,
      checksum: sha256_hex(body.as_bytes()),
    })
  }

  pub async fn read_issue(
    &self,
    repo_root: &Path,
    key: &str,
  ) -> Result<Issue> {
    let path = self.issue_path(repo_root, key);
    let body =
      tokio::fs::read_to_string(&path).await.map_err(|e| {
        Error::new(
          ErrorKind::FilesystemError,
          format!("Failed to read {path:?}"),
        )
        .with_cause(e)
      })?;
    serde_yaml_ng::from_str(&body).map_err(|e| {
      Error::new(
        ErrorKind::SerializationError,
        format!("Failed to parse issue document {path:?}"),
      )
      .with_cause(e)
    })
  }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}
