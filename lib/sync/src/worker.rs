//! The per-issue pipeline each worker runs: slot, rate wait,
//! fetch with retry, unchanged check, write, links, commit.
//! Effect order is strict; the commit always observes the
//! written file and its links.

use std::path::PathBuf;
use std::sync::Arc;

use git::Repository;
use indexmap::IndexMap;
use links::LinkManager;
use rate_limit::RateLimiter;
use state::should_sync_issue_snapshot;
use ticketry_client::RemoteClient;
use ticketry_client::entities::issue::Issue;
use ticketry_client::entities::operation::SyncConfig;
use ticketry_client::entities::state::IssueState;
use ticketry_client::error::{Error, ErrorKind, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use writer::{FileWriter, WrittenFile};

/// Transient fetch failures are retried this many times before
/// the issue is recorded as failed.
const MAX_FETCH_ATTEMPTS: usize = 4;

/// Everything a worker needs, shared across the pool.
pub(crate) struct WorkerContext {
  pub client: Arc<dyn RemoteClient>,
  pub limiter: Arc<RateLimiter>,
  pub repository: Arc<dyn Repository>,
  pub writer: FileWriter,
  pub links: LinkManager,
  /// Serializes commits; concurrent index writes corrupt git.
  pub committer: Mutex<()>,
  pub repo_path: PathBuf,
  /// Read-only snapshot of issue states at planning time.
  pub prior: IndexMap<String, IssueState>,
  pub config: SyncConfig,
}

#[derive(Debug)]
pub(crate) enum Outcome {
  Synced {
    key: String,
    issue: Box<Issue>,
    written: WrittenFile,
    commit: String,
    link_errors: Vec<String>,
  },
  Skipped {
    key: String,
    reason: SkipReason,
  },
  Failed {
    key: String,
    error: Error,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkipReason {
  Unchanged,
  DryRun,
  Cancelled,
}

impl Outcome {
  pub(crate) fn key(&self) -> &str {
    match self {
      Outcome::Synced { key, .. }
      | Outcome::Skipped { key, .. }
      | Outcome::Failed { key, .. } => key,
    }
  }
}

pub(crate) async fn process_issue(
  ctx: &CancellationToken,
  worker: &WorkerContext,
  key: String,
) -> Outcome {
  if let Err(error) = worker.limiter.acquire_slot(ctx).await {
    return cancelled_or_failed(key, error);
  }
  let outcome = process_locked(ctx, worker, &key).await;
  worker.limiter.release_slot();
  match outcome {
    Ok(outcome) => outcome,
    Err(error) => cancelled_or_failed(key, error),
  }
}

fn cancelled_or_failed(key: String, error: Error) -> Outcome {
  if error.kind == ErrorKind::Cancelled {
    Outcome::Skipped {
      key,
      reason: SkipReason::Cancelled,
    }
  } else {
    Outcome::Failed { key, error }
  }
}

async fn process_locked(
  ctx: &CancellationToken,
  worker: &WorkerContext,
  key: &str,
) -> Result<Outcome> {
  let issue = fetch_with_retry(ctx, worker, key).await?;

  let unchanged = !worker.config.force
    && !should_sync_issue_snapshot(&worker.prior, &issue);
  if unchanged {
    return Ok(Outcome::Skipped {
      key: key.to_string(),
      reason: SkipReason::Unchanged,
    });
  }
  if worker.config.dry_run {
    return Ok(Outcome::Skipped {
      key: key.to_string(),
      reason: SkipReason::DryRun,
    });
  }

  let written =
    worker.writer.write_issue(&worker.repo_path, &issue).await?;

  let mut link_errors = Vec::new();
  if worker.config.include_links {
    let report = worker
      .links
      .create_issue_links(&worker.repo_path, &issue)
      .await;
    for error in report.errors {
      warn!("{key}: link creation failed | {error:#}");
      link_errors.push(error.to_string());
    }
  }

  let commit = {
    let _guard = worker.committer.lock().await;
    worker
      .repository
      .commit_issue_file(
        &worker.repo_path,
        &written.relative_path,
        &issue,
      )
      .await?
  };

  Ok(Outcome::Synced {
    key: key.to_string(),
    issue: Box::new(issue),
    written,
    commit,
    link_errors,
  })
}

/// Rate-limited fetch. Transient failures (throttle, network)
/// are absorbed by the limiter's backoff and retried here; other
/// kinds surface immediately.
async fn fetch_with_retry(
  ctx: &CancellationToken,
  worker: &WorkerContext,
  key: &str,
) -> Result<Issue> {
  let mut attempt = 0;
  loop {
    attempt += 1;
    worker.limiter.wait(ctx).await?;
    match worker.client.get_issue(key).await {
      Ok(issue) => return Ok(issue),
      Err(error)
        if error.is_transient()
          && attempt < MAX_FETCH_ATTEMPTS =>
      {
        warn!(
          "{key}: fetch attempt {attempt} failed, retrying | {error:#}"
        );
      }
      Err(error) => return Err(error),
    }
  }
}
