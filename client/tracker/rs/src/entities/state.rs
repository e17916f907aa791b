use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::operation::SyncOperation;

/// Current state document schema tag.
pub const STATE_SCHEMA_VERSION: &str = "1";

/// History keeps this many most-recent operations.
pub const MAX_HISTORY_ENTRIES: usize = 50;

/// The per-repository state document. Owned exclusively by the
/// sync engine during a run; persisted atomically by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
  pub version: String,
  pub repository: RepositoryInfo,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_sync: Option<SyncOperation>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub history: Vec<SyncOperation>,
  #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
  pub issues: IndexMap<String, IssueState>,
  #[serde(default)]
  pub stats: SyncStats,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Fields written by newer schemas survive a round-trip.
  #[serde(flatten)]
  pub extra: IndexMap<String, serde_yaml_ng::Value>,
}

impl SyncState {
  pub fn new(repository: RepositoryInfo, now: DateTime<Utc>) -> Self {
    Self {
      version: STATE_SCHEMA_VERSION.to_string(),
      repository,
      last_sync: None,
      history: Vec::new(),
      issues: IndexMap::new(),
      stats: SyncStats::default(),
      created_at: now,
      updated_at: now,
      extra: IndexMap::new(),
    }
  }

  pub fn remove_issue_state(
    &mut self,
    key: &str,
  ) -> Option<IssueState> {
    self.issues.shift_remove(key)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
  pub path: PathBuf,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub branch: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub remote_url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub initial_sync: Option<DateTime<Utc>>,
}

/// Tracking record for one synced issue, keyed by issue key.
/// Created on first successful write, mutated only by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueState {
  pub project_key: String,
  /// When the engine last wrote this issue. `None` = never.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_synced: Option<DateTime<Utc>>,
  /// The remote `updated` timestamp at last sync, if it parsed.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<DateTime<Utc>>,
  /// Issue file path, relative to the repository root.
  pub file_path: PathBuf,
  pub file_size: u64,
  /// SHA-256 of the written file.
  pub checksum: String,
  pub sync_status: SyncStatus,
  pub sync_count: u64,
  pub version: u64,
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
pub enum SyncStatus {
  #[default]
  Pending,
  Synced,
  Failed,
}

/// Rolled-up statistics across all operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
  pub total_operations: u64,
  pub successful_operations: u64,
  pub failed_operations: u64,
  pub total_sync_time_ms: u64,
  pub average_sync_time_ms: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_success: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_failure: Option<DateTime<Utc>>,
  /// `issues.len()` after the last update.
  pub unique_issues: usize,
  /// Sorted unique project keys with at least one tracked issue.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub active_projects: Vec<String>,
}
