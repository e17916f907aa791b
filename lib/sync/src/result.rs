use ticketry_client::entities::operation::{
  OperationStatus, SyncOperation,
};

/// What one engine invocation produced. The finalized operation
/// (with per-issue results and errors) is also the entry that
/// went into the state document's history.
#[derive(Debug, Clone)]
pub struct BatchResult {
  pub operation: SyncOperation,
  /// Commit hashes in completion order.
  pub commits: Vec<String>,
  /// Link failures are reported here, never fatal.
  pub link_errors: Vec<String>,
  pub throughput_issues_per_sec: f64,
  pub dry_run: bool,
}

impl BatchResult {
  pub fn status(&self) -> OperationStatus {
    self.operation.status
  }

  /// Full success: every requested issue synced or skipped.
  pub fn is_success(&self) -> bool {
    self.operation.status == OperationStatus::Completed
  }
}
