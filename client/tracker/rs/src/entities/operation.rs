use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::ErrorKind;

/// Tuning knobs for one sync run. Also embedded in profiles
/// and recorded on every operation in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
  /// Worker count for the fetch pool.
  #[serde(default = "default_concurrency")]
  pub concurrency: usize,
  /// Minimum spacing between remote requests, in milliseconds.
  #[serde(default = "default_rate_limit_ms")]
  pub rate_limit_ms: u64,
  #[serde(default)]
  pub incremental: bool,
  /// Re-sync issues even when unchanged.
  #[serde(default)]
  pub force: bool,
  /// Plan and fetch, but never touch the repository.
  #[serde(default)]
  pub dry_run: bool,
  #[serde(default = "default_include_links")]
  pub include_links: bool,
}

fn default_concurrency() -> usize {
  4
}

fn default_rate_limit_ms() -> u64 {
  200
}

fn default_include_links() -> bool {
  true
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      concurrency: default_concurrency(),
      rate_limit_ms: default_rate_limit_ms(),
      incremental: false,
      force: false,
      dry_run: false,
      include_links: default_include_links(),
    }
  }
}

impl SyncConfig {
  pub fn rate_limit(&self) -> Duration {
    Duration::from_millis(self.rate_limit_ms)
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationType {
  #[default]
  Issues,
  Jql,
  Incremental,
  Full,
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationStatus {
  #[default]
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
  Partial,
}

/// One engine invocation with a defined scope,
/// appended to `SyncState::history`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
  /// Unique, monotonic by start time.
  pub id: String,
  #[serde(rename = "type")]
  pub op_type: OperationType,
  pub start_time: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
  /// `end_time - start_time`, in milliseconds.
  #[serde(default)]
  pub duration_ms: u64,
  pub status: OperationStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub config: Option<SyncConfig>,
  #[serde(default)]
  pub results: SyncResults,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
  pub metadata: IndexMap<String, String>,
}

impl SyncOperation {
  pub fn finish(
    &mut self,
    status: OperationStatus,
    end_time: DateTime<Utc>,
  ) {
    self.status = status;
    self.end_time = Some(end_time);
    self.duration_ms = (end_time - self.start_time)
      .num_milliseconds()
      .max(0) as u64;
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResults {
  pub total: usize,
  pub processed: usize,
  pub successful: usize,
  pub failed: usize,
  pub skipped: usize,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub processed_files: Vec<PathBuf>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<IssueError>,
}

/// Per-issue failure entry, surfaced in the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueError {
  pub issue_key: String,
  pub kind: ErrorKind,
  pub message: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn operation_finish_sets_duration() {
    let start = "2024-01-01T00:00:00Z".parse().unwrap();
    let end = "2024-01-01T00:00:05Z".parse().unwrap();
    let mut op = SyncOperation {
      start_time: start,
      ..Default::default()
    };
    op.finish(OperationStatus::Completed, end);
    assert_eq!(op.duration_ms, 5000);
    assert!(op.end_time.unwrap() >= op.start_time);
  }

  #[test]
  fn operation_type_serializes_snake_case() {
    assert_eq!(OperationType::Incremental.to_string(), "incremental");
    assert_eq!(OperationStatus::Partial.to_string(), "partial");
  }
}
