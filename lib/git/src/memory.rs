use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use ticketry_client::entities::issue::Issue;
use ticketry_client::error::{Error, ErrorKind, Result};

use crate::{
  Repository,
  message::{commit_message, commit_subject},
};

/// Records commits instead of running git. Lets engine tests
/// assert on the exact commit stream without a git binary.
#[derive(Default)]
pub struct MemoryRepository {
  state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
  initialized: HashSet<PathBuf>,
  commits: Vec<RecordedCommit>,
  dirty: bool,
  counter: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommit {
  pub repo: PathBuf,
  pub file_path: PathBuf,
  pub subject: String,
  pub message: String,
}

impl MemoryRepository {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make the next `validate_working_tree` fail.
  pub fn set_dirty(&self, dirty: bool) {
    self.state.lock().unwrap().dirty = dirty;
  }

  pub fn commits(&self) -> Vec<RecordedCommit> {
    self.state.lock().unwrap().commits.clone()
  }

  pub fn commit_count(&self) -> usize {
    self.state.lock().unwrap().commits.len()
  }
}

#[async_trait]
impl Repository for MemoryRepository {
  async fn initialize(&self, path: &Path) -> Result<()> {
    self
      .state
      .lock()
      .unwrap()
      .initialized
      .insert(path.to_path_buf());
    Ok(())
  }

  async fn validate_working_tree(&self, path: &Path) -> Result<()> {
    let state = self.state.lock().unwrap();
    if !state.initialized.contains(path) {
      return Err(Error::new(
        ErrorKind::RepositoryNotFound,
        format!("No repository at {path:?}"),
      ));
    }
    if state.dirty {
      return Err(Error::new(
        ErrorKind::DirtyWorkingTree,
        format!("Working tree at {path:?} has uncommitted changes"),
      ));
    }
    Ok(())
  }

  async fn commit_issue_file(
    &self,
    path: &Path,
    file_path: &Path,
    issue: &Issue,
  ) -> Result<String> {
    if file_path.is_absolute() {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "Commit path must be relative to the repository, got {file_path:?}"
        ),
      ));
    }
    let mut state = self.state.lock().unwrap();
    if !state.initialized.contains(path) {
      return Err(Error::new(
        ErrorKind::RepositoryNotFound,
        format!("No repository at {path:?}"),
      ));
    }
    state.counter += 1;
    let hash = format!("{:07x}", state.counter);
    state.commits.push(RecordedCommit {
      repo: path.to_path_buf(),
      file_path: file_path.to_path_buf(),
      subject: commit_subject(issue),
      message: commit_message(issue),
    });
    Ok(hash)
  }
}
