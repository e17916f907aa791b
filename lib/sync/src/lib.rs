//! The sync engine: plan, fetch through a bounded worker pool,
//! write, link, commit, record state.
//!
//! Ownership is deliberate: workers only ever see a read-only
//! snapshot of prior issue states and publish outcomes over a
//! channel; the engine task is the single writer of the state
//! document. Commits are serialized through one mutex. The
//! progress channel is closed exactly once, after every worker
//! has exited, and stays drainable after the sync returns.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{StreamExt, stream::FuturesUnordered};
use git::Repository;
use links::LinkManager;
use rate_limit::RateLimiter;
use state::{ChangedIssuesOptions, StateStore, update_statistics};
use ticketry_client::RemoteClient;
use ticketry_client::entities::issue::valid_issue_key;
use ticketry_client::entities::operation::{
  IssueError, OperationStatus, OperationType, SyncConfig,
  SyncOperation, SyncResults,
};
use ticketry_client::entities::state::{
  RepositoryInfo, SyncState, SyncStatus,
};
use ticketry_client::error::{ErrorKind, Result};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use writer::FileWriter;

mod progress;
mod result;
mod worker;

pub use progress::{
  Progress, ProgressSender, SyncPhase, channel as progress_channel,
};
pub use result::BatchResult;

use worker::{Outcome, WorkerContext};

/// JQL expansion fetches at most this many issues.
const JQL_MAX_RESULTS: usize = 1000;

/// State is flushed every this many applied outcomes.
const SAVE_EVERY: usize = 10;

#[derive(Default)]
pub struct SyncOptions {
  pub config: SyncConfig,
  /// Progress sink; the engine consumes it and closes the
  /// stream when the sync finishes.
  pub progress: Option<ProgressSender>,
}

pub struct SyncEngine {
  client: Arc<dyn RemoteClient>,
  repository: Arc<dyn Repository>,
  limiter: Arc<RateLimiter>,
  store: StateStore,
  writer: FileWriter,
  links: LinkManager,
}

impl SyncEngine {
  pub fn new(
    client: Arc<dyn RemoteClient>,
    repository: Arc<dyn Repository>,
    limiter: Arc<RateLimiter>,
  ) -> Self {
    Self {
      client,
      repository,
      limiter,
      store: StateStore::new(),
      writer: FileWriter::new(),
      links: LinkManager::new(),
    }
  }

  /// Sync an explicit set of issue keys.
  pub async fn sync_issues(
    &self,
    ctx: &CancellationToken,
    keys: Vec<String>,
    repo_path: &Path,
    opts: SyncOptions,
  ) -> Result<BatchResult> {
    self
      .run(ctx, keys, repo_path, opts, OperationType::Issues)
      .await
  }

  /// Expand a query to keys via the remote, then sync those.
  pub async fn sync_jql(
    &self,
    ctx: &CancellationToken,
    jql: &str,
    repo_path: &Path,
    opts: SyncOptions,
  ) -> Result<BatchResult> {
    let keys = self.expand_jql(jql).await?;
    self
      .run(ctx, keys, repo_path, opts, OperationType::Jql)
      .await
  }

  /// Keys path with state-aware planning. An empty key set
  /// means "whatever the state document says is due".
  pub async fn sync_issues_incremental(
    &self,
    ctx: &CancellationToken,
    keys: Vec<String>,
    repo_path: &Path,
    opts: SyncOptions,
  ) -> Result<BatchResult> {
    let keys = if keys.is_empty() {
      let state = self.store.load_state(repo_path).await?;
      match state {
        Some(state) => state::get_changed_issues(
          &state,
          &ChangedIssuesOptions {
            force: opts.config.force,
            since: state
              .last_sync
              .as_ref()
              .and_then(|operation| operation.end_time),
            ..Default::default()
          },
          Utc::now(),
        ),
        None => Vec::new(),
      }
    } else {
      keys
    };
    self
      .run(ctx, keys, repo_path, opts, OperationType::Incremental)
      .await
  }

  /// Query path with state-aware planning: the query is
  /// narrowed to issues updated since the last recorded sync.
  pub async fn sync_jql_incremental(
    &self,
    ctx: &CancellationToken,
    jql: &str,
    repo_path: &Path,
    opts: SyncOptions,
  ) -> Result<BatchResult> {
    let since = self
      .store
      .load_state(repo_path)
      .await?
      .and_then(|state| state.last_sync)
      .and_then(|operation| operation.end_time);
    let narrowed = match since {
      Some(since) => format!(
        "({jql}) AND updated >= \"{}\"",
        since.format("%Y-%m-%d %H:%M")
      ),
      None => jql.to_string(),
    };
    let keys = self.expand_jql(&narrowed).await?;
    self
      .run(ctx, keys, repo_path, opts, OperationType::Incremental)
      .await
  }

  async fn expand_jql(&self, jql: &str) -> Result<Vec<String>> {
    let results =
      self.client.search(jql, JQL_MAX_RESULTS).await?;
    if results.total > results.issues.len() {
      warn!(
        "query matched {} issues, syncing the first {}",
        results.total,
        results.issues.len()
      );
    }
    Ok(
      results
        .issues
        .into_iter()
        .map(|issue| issue.key)
        .collect(),
    )
  }

  async fn run(
    &self,
    ctx: &CancellationToken,
    keys: Vec<String>,
    repo_path: &Path,
    opts: SyncOptions,
    op_type: OperationType,
  ) -> Result<BatchResult> {
    let config = opts.config.clone();
    let progress = opts.progress;
    let started = Utc::now();
    let stopwatch = Instant::now();

    let (keys, invalid) = partition_keys(keys);
    let total = keys.len() + invalid.len();

    if !config.dry_run {
      self.repository.initialize(repo_path).await?;
      self.repository.validate_working_tree(repo_path).await?;
    }

    let mut state =
      match self.store.load_state(repo_path).await? {
        Some(state) => state,
        None => SyncState::new(
          RepositoryInfo {
            path: repo_path.to_path_buf(),
            initial_sync: Some(started),
            ..Default::default()
          },
          started,
        ),
      };

    // Lexically monotonic by start time, unique by suffix.
    let suffix = Uuid::new_v4().simple().to_string();
    let id = format!(
      "op-{}-{}",
      started.timestamp_millis(),
      &suffix[..8]
    );
    let mut operation = SyncOperation {
      id,
      op_type,
      start_time: started,
      status: OperationStatus::Running,
      config: Some(config.clone()),
      ..Default::default()
    };

    if let Some(progress) = &progress {
      progress.event(SyncPhase::Planning, total, 0, None);
    }
    info!(
      "sync {}: {op_type} operation over {total} issues",
      operation.id
    );

    let worker_count = config.concurrency.max(1);
    let run_ctx = ctx.child_token();
    let (keys_tx, keys_rx) =
      mpsc::channel::<String>(worker_count * 2);
    let keys_rx = Arc::new(Mutex::new(keys_rx));
    let (outcome_tx, mut outcome_rx) =
      mpsc::channel::<Outcome>(worker_count * 2);

    let worker_ctx = Arc::new(WorkerContext {
      client: self.client.clone(),
      limiter: self.limiter.clone(),
      repository: self.repository.clone(),
      writer: self.writer.clone(),
      links: self.links.clone(),
      committer: Mutex::new(()),
      repo_path: repo_path.to_path_buf(),
      prior: state.issues.clone(),
      config: config.clone(),
    });

    let feeder_ctx = run_ctx.clone();
    let feeder = tokio::spawn(async move {
      for key in keys {
        if feeder_ctx.is_cancelled() {
          break;
        }
        if keys_tx.send(key).await.is_err() {
          break;
        }
      }
    });

    let mut workers = FuturesUnordered::new();
    for _ in 0..worker_count {
      let keys_rx = keys_rx.clone();
      let outcome_tx = outcome_tx.clone();
      let worker_ctx = worker_ctx.clone();
      let worker_token = run_ctx.clone();
      workers.push(tokio::spawn(async move {
        loop {
          let next = keys_rx.lock().await.recv().await;
          let Some(key) = next else {
            break;
          };
          let outcome = worker::process_issue(
            &worker_token,
            &worker_ctx,
            key,
          )
          .await;
          let fatal = matches!(
            &outcome,
            Outcome::Failed { error, .. } if error.is_fatal()
          );
          if outcome_tx.send(outcome).await.is_err() {
            break;
          }
          if fatal {
            // Fatal kinds abort the batch; stop feeding work.
            worker_token.cancel();
          }
        }
      }));
    }
    drop(outcome_tx);

    // This task is the single writer of the state document.
    let mut results = SyncResults {
      total,
      ..Default::default()
    };
    let mut commits = Vec::new();
    let mut link_errors = Vec::new();
    let mut processed = 0usize;
    let mut since_save = 0usize;
    while let Some(outcome) = outcome_rx.recv().await {
      processed += 1;
      let key = outcome.key().to_string();
      apply_outcome(
        &mut state,
        &mut results,
        &mut commits,
        &mut link_errors,
        outcome,
      );
      if let Some(progress) = &progress {
        progress.event(
          SyncPhase::Fetching,
          total,
          processed,
          Some(key),
        );
      }
      since_save += 1;
      if !config.dry_run && since_save >= SAVE_EVERY {
        self.store.save_state(repo_path, &mut state).await?;
        since_save = 0;
      }
    }
    feeder.await.ok();
    // Watch the worker handles down to the last one.
    while let Some(joined) = workers.next().await {
      if let Err(e) = joined {
        error!("WORKER ERROR | {e}");
      }
    }

    for key in invalid {
      results.failed += 1;
      results.errors.push(IssueError {
        issue_key: key.clone(),
        kind: ErrorKind::InvalidInput,
        message: format!("'{key}' is not a valid issue key"),
      });
    }

    if let Some(progress) = &progress {
      progress.event(
        SyncPhase::Finalizing,
        total,
        processed,
        None,
      );
    }

    results.processed =
      results.successful + results.failed + results.skipped;
    let status = final_status(ctx, &results);
    operation.results = results;
    operation.finish(status, Utc::now());

    if !config.dry_run {
      state.last_sync = Some(operation.clone());
      state.history.push(operation.clone());
      update_statistics(&mut state, &operation);
      self.store.save_state(repo_path, &mut state).await?;
    }

    let elapsed = stopwatch.elapsed().as_secs_f64();
    let throughput = if elapsed > 0.0 {
      operation.results.processed as f64 / elapsed
    } else {
      0.0
    };
    info!(
      "sync {}: {status} | {} ok, {} skipped, {} failed",
      operation.id,
      operation.results.successful,
      operation.results.skipped,
      operation.results.failed
    );
    if let Some(progress) = &progress {
      progress.event(
        SyncPhase::Complete,
        total,
        processed,
        None,
      );
    }

    Ok(BatchResult {
      operation,
      commits,
      link_errors,
      throughput_issues_per_sec: throughput,
      dry_run: config.dry_run,
    })
  }
}

/// Dedup while keeping order; split off keys that can never
/// resolve so they are reported instead of fetched.
fn partition_keys(
  keys: Vec<String>,
) -> (Vec<String>, Vec<String>) {
  let mut seen = HashSet::new();
  let mut valid = Vec::new();
  let mut invalid = Vec::new();
  for key in keys {
    if !seen.insert(key.clone()) {
      continue;
    }
    if valid_issue_key(&key) {
      valid.push(key);
    } else {
      invalid.push(key);
    }
  }
  (valid, invalid)
}

fn apply_outcome(
  state: &mut SyncState,
  results: &mut SyncResults,
  commits: &mut Vec<String>,
  link_errors: &mut Vec<String>,
  outcome: Outcome,
) {
  match outcome {
    Outcome::Synced {
      key,
      issue,
      written,
      commit,
      link_errors: errors,
    } => {
      let issue_state = state.issues.entry(key).or_default();
      issue_state.project_key =
        issue.project_key().to_string();
      issue_state.last_synced = Some(Utc::now());
      issue_state.last_updated = issue.updated_at();
      issue_state.file_path = written.relative_path.clone();
      issue_state.file_size = written.size;
      issue_state.checksum = written.checksum;
      issue_state.sync_status = SyncStatus::Synced;
      issue_state.sync_count += 1;
      issue_state.version += 1;
      results.successful += 1;
      results.processed_files.push(written.relative_path);
      commits.push(commit);
      link_errors.extend(errors);
    }
    Outcome::Skipped { key, reason } => {
      debug!("{key}: skipped ({reason:?})");
      results.skipped += 1;
    }
    Outcome::Failed { key, error } => {
      warn!("{key}: sync failed | {error:#}");
      if let Some(issue_state) = state.issues.get_mut(&key) {
        issue_state.sync_status = SyncStatus::Failed;
      }
      results.failed += 1;
      results.errors.push(IssueError {
        issue_key: key,
        kind: error.kind,
        message: error.message,
      });
    }
  }
}

fn final_status(
  ctx: &CancellationToken,
  results: &SyncResults,
) -> OperationStatus {
  if ctx.is_cancelled() {
    return OperationStatus::Cancelled;
  }
  if results
    .errors
    .iter()
    .any(|error| error.kind.is_fatal())
  {
    return OperationStatus::Failed;
  }
  if results.failed == 0 {
    OperationStatus::Completed
  } else if results.successful > 0 {
    OperationStatus::Partial
  } else {
    OperationStatus::Failed
  }
}
