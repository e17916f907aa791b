//! Rolled-up statistics over the operation history.

use ticketry_client::entities::operation::{
  OperationStatus, SyncOperation,
};
use ticketry_client::entities::state::SyncState;

/// Fold one finished operation into the running statistics.
pub fn update_statistics(
  state: &mut SyncState,
  operation: &SyncOperation,
) {
  let stats = &mut state.stats;
  stats.total_operations += 1;
  match operation.status {
    OperationStatus::Completed => {
      stats.successful_operations += 1;
      stats.last_success =
        operation.end_time.or(stats.last_success);
    }
    OperationStatus::Failed
    | OperationStatus::Partial
    | OperationStatus::Cancelled => {
      stats.failed_operations += 1;
      stats.last_failure =
        operation.end_time.or(stats.last_failure);
    }
    OperationStatus::Pending | OperationStatus::Running => {}
  }
  stats.total_sync_time_ms += operation.duration_ms;
  stats.average_sync_time_ms =
    stats.total_sync_time_ms / stats.total_operations;

  stats.unique_issues = state.issues.len();
  let mut projects: Vec<String> = state
    .issues
    .values()
    .map(|issue_state| issue_state.project_key.clone())
    .collect();
  projects.sort();
  projects.dedup();
  stats.active_projects = projects;
}
