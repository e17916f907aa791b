//! End-to-end engine scenarios over the in-memory doubles.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use git::MemoryRepository;
use rate_limit::{RateLimitConfig, RateLimiter};
use sync::{SyncEngine, SyncOptions, SyncPhase, progress_channel};
use ticketry_client::entities::issue::{
  Issue, Relationships, Status,
};
use ticketry_client::entities::operation::{
  OperationStatus, OperationType, SyncConfig,
};
use ticketry_client::error::ErrorKind;
use ticketry_client::mock::MockTrackerClient;
use tokio_util::sync::CancellationToken;

fn fast_limiter() -> Arc<RateLimiter> {
  RateLimiter::new(RateLimitConfig {
    min_request_spacing: Duration::from_millis(1),
    base_backoff: Duration::from_millis(5),
    max_backoff_delay: Duration::from_millis(50),
    max_concurrent_requests: 4,
  })
}

struct Harness {
  client: Arc<MockTrackerClient>,
  repo: Arc<MemoryRepository>,
  engine: SyncEngine,
}

fn harness() -> Harness {
  let client = Arc::new(MockTrackerClient::new());
  let repo = Arc::new(MemoryRepository::new());
  let limiter = fast_limiter();
  client.set_observer(limiter.clone());
  let engine =
    SyncEngine::new(client.clone(), repo.clone(), limiter);
  Harness {
    client,
    repo,
    engine,
  }
}

fn bug_issue(key: &str, summary: &str, updated: &str) -> Issue {
  Issue {
    key: key.into(),
    summary: summary.into(),
    issuetype: "Bug".into(),
    status: Status {
      name: "Open".into(),
      category: "To Do".into(),
    },
    updated: updated.into(),
    created: "2024-01-01T00:00:00.000Z".into(),
    ..Default::default()
  }
}

fn opts(config: SyncConfig) -> SyncOptions {
  SyncOptions {
    config,
    progress: None,
  }
}

async fn load_state(
  repo_path: &Path,
) -> ticketry_client::entities::state::SyncState {
  state::StateStore::new()
    .load_state(repo_path)
    .await
    .unwrap()
    .expect("state document exists")
}

#[tokio::test]
async fn single_issue_sync() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  h.client.insert_issue(bug_issue(
    "PROJ-123",
    "Fix X",
    "2024-01-02T15:30:00.000Z",
  ));

  let ctx = CancellationToken::new();
  let result = h
    .engine
    .sync_issues(
      &ctx,
      vec!["PROJ-123".into()],
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();

  assert_eq!(result.status(), OperationStatus::Completed);
  assert!(result.is_success());
  assert_eq!(result.operation.results.successful, 1);
  assert_eq!(result.commits.len(), 1);

  assert!(
    dir
      .path()
      .join("projects/PROJ/issues/PROJ-123.yaml")
      .exists()
  );
  let commits = h.repo.commits();
  assert_eq!(commits.len(), 1);
  assert_eq!(
    commits[0].subject,
    "fix(PROJ): add issue PROJ-123 - Fix X"
  );

  let state = load_state(dir.path()).await;
  assert_eq!(state.issues["PROJ-123"].sync_count, 1);
  assert_eq!(state.history.len(), 1);
  assert_eq!(
    state.history[0].op_type,
    OperationType::Issues
  );
}

#[tokio::test]
async fn resync_unchanged_skips() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  h.client.insert_issue(bug_issue(
    "PROJ-123",
    "Fix X",
    "2024-01-02T15:30:00.000Z",
  ));
  let ctx = CancellationToken::new();

  h.engine
    .sync_issues(
      &ctx,
      vec!["PROJ-123".into()],
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();
  let updated_at_before =
    load_state(dir.path()).await.updated_at;

  let second = h
    .engine
    .sync_issues(
      &ctx,
      vec!["PROJ-123".into()],
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();

  assert_eq!(second.status(), OperationStatus::Completed);
  assert_eq!(second.operation.results.skipped, 1);
  assert_eq!(second.operation.results.successful, 0);
  assert_eq!(h.repo.commit_count(), 1);

  let state = load_state(dir.path()).await;
  assert_eq!(state.issues["PROJ-123"].sync_count, 1);
  assert!(state.updated_at > updated_at_before);
}

#[tokio::test]
async fn force_resync_commits_again() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  h.client.insert_issue(bug_issue(
    "PROJ-123",
    "Fix X",
    "2024-01-02T15:30:00.000Z",
  ));
  let ctx = CancellationToken::new();

  for force in [false, true] {
    h.engine
      .sync_issues(
        &ctx,
        vec!["PROJ-123".into()],
        dir.path(),
        opts(SyncConfig {
          force,
          ..Default::default()
        }),
      )
      .await
      .unwrap();
  }

  assert_eq!(h.repo.commit_count(), 2);
  let state = load_state(dir.path()).await;
  assert_eq!(state.issues["PROJ-123"].sync_count, 2);
}

#[tokio::test]
async fn epic_discovery_produces_the_link_graph() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();

  h.client.insert_issue(Issue {
    key: "E-1".into(),
    summary: "The epic".into(),
    issuetype: "Epic".into(),
    ..Default::default()
  });
  h.client.insert_issue(Issue {
    key: "E-2".into(),
    summary: "Story".into(),
    issuetype: "Story".into(),
    relationships: Some(Relationships {
      epic_link: Some("E-1".into()),
      ..Default::default()
    }),
    ..Default::default()
  });
  h.client.insert_issue(Issue {
    key: "E-3".into(),
    summary: "Task".into(),
    issuetype: "Task".into(),
    relationships: Some(Relationships {
      epic_link: Some("E-1".into()),
      subtasks: vec!["E-4".into()],
      ..Default::default()
    }),
    ..Default::default()
  });
  h.client.insert_issue(Issue {
    key: "E-4".into(),
    summary: "Subtask".into(),
    issuetype: "Sub-task".into(),
    relationships: Some(Relationships {
      epic_link: Some("E-1".into()),
      parent_issue: Some("E-3".into()),
      ..Default::default()
    }),
    ..Default::default()
  });

  let result = h
    .engine
    .sync_issues(
      &ctx,
      vec![
        "E-1".into(),
        "E-2".into(),
        "E-3".into(),
        "E-4".into(),
      ],
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();
  assert_eq!(result.operation.results.successful, 4);
  assert!(result.link_errors.is_empty());

  for key in ["E-1", "E-2", "E-3", "E-4"] {
    assert!(
      dir
        .path()
        .join(format!("projects/E/issues/{key}.yaml"))
        .exists()
    );
  }
  let rel = dir.path().join("projects/E/relationships");
  for key in ["E-2", "E-3", "E-4"] {
    assert_eq!(
      std::fs::read_link(rel.join("epic").join(key)).unwrap(),
      Path::new("../../issues/E-1.yaml")
    );
  }
  assert_eq!(
    std::fs::read_link(rel.join("subtasks/E-3/E-4")).unwrap(),
    Path::new("../../../issues/E-4.yaml")
  );
  assert_eq!(
    std::fs::read_link(rel.join("parent/E-4")).unwrap(),
    Path::new("../../issues/E-3.yaml")
  );
}

#[tokio::test]
async fn incremental_sync_after_remote_update() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();
  h.client.insert_issue(bug_issue(
    "PROJ-123",
    "Fix X",
    "2024-01-02T15:30:00.000Z",
  ));

  h.engine
    .sync_issues(
      &ctx,
      vec!["PROJ-123".into()],
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();

  // The remote issue advances.
  h.client.insert_issue(bug_issue(
    "PROJ-123",
    "Fix X",
    "2024-03-01T09:00:00.000Z",
  ));

  let result = h
    .engine
    .sync_issues_incremental(
      &ctx,
      vec!["PROJ-123".into()],
      dir.path(),
      opts(SyncConfig {
        incremental: true,
        ..Default::default()
      }),
    )
    .await
    .unwrap();

  assert_eq!(result.status(), OperationStatus::Completed);
  assert_eq!(result.operation.results.successful, 1);
  assert_eq!(h.repo.commit_count(), 2);

  let state = load_state(dir.path()).await;
  assert_eq!(state.history.len(), 2);
  let last = state.history.last().unwrap();
  assert_eq!(last.op_type, OperationType::Incremental);
  assert_eq!(last.status, OperationStatus::Completed);
  assert_eq!(last.results.successful, 1);
}

#[tokio::test]
async fn not_found_is_recorded_and_does_not_abort() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();
  h.client.insert_issue(bug_issue(
    "PROJ-1",
    "Exists",
    "2024-01-02T15:30:00.000Z",
  ));

  let result = h
    .engine
    .sync_issues(
      &ctx,
      vec!["PROJ-1".into(), "PROJ-404".into()],
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();

  assert_eq!(result.status(), OperationStatus::Partial);
  assert_eq!(result.operation.results.successful, 1);
  assert_eq!(result.operation.results.failed, 1);
  let errors = &result.operation.results.errors;
  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0].issue_key, "PROJ-404");
  assert_eq!(errors[0].kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();
  h.client.insert_issue(bug_issue(
    "PROJ-1",
    "Flaky",
    "2024-01-02T15:30:00.000Z",
  ));
  h.client.fail_next(
    "PROJ-1",
    ErrorKind::RateLimited,
    2,
  );

  let result = h
    .engine
    .sync_issues(
      &ctx,
      vec!["PROJ-1".into()],
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();

  assert_eq!(result.status(), OperationStatus::Completed);
  assert_eq!(result.operation.results.successful, 1);
  // Two throttled attempts plus the success.
  assert_eq!(h.client.get_calls(), 3);
}

#[tokio::test]
async fn fatal_errors_abort_with_partial_results() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();
  h.client.insert_issue(bug_issue(
    "PROJ-1",
    "Poisoned",
    "2024-01-02T15:30:00.000Z",
  ));
  h.client.fail_next(
    "PROJ-1",
    ErrorKind::AuthenticationFailed,
    1,
  );

  let result = h
    .engine
    .sync_issues(
      &ctx,
      vec!["PROJ-1".into()],
      dir.path(),
      opts(SyncConfig {
        concurrency: 1,
        ..Default::default()
      }),
    )
    .await
    .unwrap();

  assert_eq!(result.status(), OperationStatus::Failed);
  assert_eq!(
    result.operation.results.errors[0].kind,
    ErrorKind::AuthenticationFailed
  );
}

#[tokio::test]
async fn dry_run_never_writes() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();
  h.client.insert_issue(bug_issue(
    "PROJ-1",
    "Untouched",
    "2024-01-02T15:30:00.000Z",
  ));

  let result = h
    .engine
    .sync_issues(
      &ctx,
      vec!["PROJ-1".into()],
      dir.path(),
      opts(SyncConfig {
        dry_run: true,
        ..Default::default()
      }),
    )
    .await
    .unwrap();

  assert!(result.dry_run);
  assert_eq!(result.status(), OperationStatus::Completed);
  assert_eq!(result.operation.results.skipped, 1);
  assert_eq!(h.repo.commit_count(), 0);
  assert!(!dir.path().join("projects").exists());
  assert!(!dir.path().join(".sync-state.yaml").exists());
}

#[tokio::test]
async fn invalid_keys_are_reported_not_fetched() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();

  let result = h
    .engine
    .sync_issues(
      &ctx,
      vec!["not a key".into()],
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();

  assert_eq!(result.status(), OperationStatus::Failed);
  assert_eq!(
    result.operation.results.errors[0].kind,
    ErrorKind::InvalidInput
  );
  assert_eq!(h.client.get_calls(), 0);
}

#[tokio::test]
async fn jql_sync_expands_to_keys() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();
  h.client.insert_issue(bug_issue(
    "PROJ-1",
    "One",
    "2024-01-02T15:30:00.000Z",
  ));
  h.client.insert_issue(bug_issue(
    "PROJ-2",
    "Two",
    "2024-01-02T15:30:00.000Z",
  ));
  h.client
    .script_search("project = PROJ", ["PROJ-1", "PROJ-2"]);

  let result = h
    .engine
    .sync_jql(
      &ctx,
      "project = PROJ ORDER BY key ASC",
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();

  assert_eq!(result.operation.op_type, OperationType::Jql);
  assert_eq!(result.operation.results.successful, 2);
  assert_eq!(h.repo.commit_count(), 2);
}

#[tokio::test]
async fn progress_stream_closes_once_and_drains_after_return() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();
  for i in 1..=3 {
    h.client.insert_issue(bug_issue(
      &format!("PROJ-{i}"),
      "X",
      "2024-01-02T15:30:00.000Z",
    ));
  }

  let (tx, mut rx) = progress_channel();
  let result = h
    .engine
    .sync_issues(
      &ctx,
      (1..=3).map(|i| format!("PROJ-{i}")).collect(),
      dir.path(),
      SyncOptions {
        config: SyncConfig::default(),
        progress: Some(tx),
      },
    )
    .await
    .unwrap();
  assert!(result.is_success());

  // Drain after the sync returned; never blocks.
  let mut events = Vec::new();
  while let Some(event) = rx.recv().await {
    events.push(event);
  }
  assert_eq!(events.first().unwrap().phase, SyncPhase::Planning);
  assert_eq!(
    events.last().unwrap().phase,
    SyncPhase::Complete
  );
  let processed: Vec<usize> = events
    .iter()
    .filter(|event| event.phase == SyncPhase::Fetching)
    .map(|event| event.processed)
    .collect();
  assert_eq!(processed, vec![1, 2, 3]);
  assert_eq!(events.last().unwrap().percentage, 100.0);
}

#[tokio::test]
async fn cancellation_finalizes_as_cancelled() {
  let h = harness();
  let dir = tempfile::tempdir().unwrap();
  let ctx = CancellationToken::new();
  for i in 1..=5 {
    h.client.insert_issue(bug_issue(
      &format!("PROJ-{i}"),
      "X",
      "2024-01-02T15:30:00.000Z",
    ));
  }
  ctx.cancel();

  let result = h
    .engine
    .sync_issues(
      &ctx,
      (1..=5).map(|i| format!("PROJ-{i}")).collect(),
      dir.path(),
      opts(SyncConfig::default()),
    )
    .await
    .unwrap();

  assert_eq!(result.status(), OperationStatus::Cancelled);
  assert_eq!(result.operation.results.successful, 0);
  // No torn files anywhere in the tree.
  assert!(no_tmp_files(dir.path()));

  let state = load_state(dir.path()).await;
  assert_eq!(
    state.history.last().unwrap().status,
    OperationStatus::Cancelled
  );
}

#[tokio::test]
async fn final_tree_is_independent_of_worker_count() {
  let mut trees = Vec::new();
  for concurrency in [1, 4] {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let ctx = CancellationToken::new();
    for i in 1..=6 {
      h.client.insert_issue(bug_issue(
        &format!("PROJ-{i}"),
        &format!("Issue {i}"),
        "2024-01-02T15:30:00.000Z",
      ));
    }
    let result = h
      .engine
      .sync_issues(
        &ctx,
        (1..=6).map(|i| format!("PROJ-{i}")).collect(),
        dir.path(),
        opts(SyncConfig {
          concurrency,
          ..Default::default()
        }),
      )
      .await
      .unwrap();
    assert!(result.is_success());

    let state = load_state(dir.path()).await;
    let mut snapshot: Vec<(String, String)> = state
      .issues
      .iter()
      .map(|(key, issue_state)| {
        (key.clone(), issue_state.checksum.clone())
      })
      .collect();
    snapshot.sort();
    trees.push(snapshot);
  }
  assert_eq!(trees[0], trees[1]);
}

fn no_tmp_files(root: &Path) -> bool {
  let mut stack = vec![root.to_path_buf()];
  while let Some(dir) = stack.pop() {
    let Ok(entries) = std::fs::read_dir(&dir) else {
      continue;
    };
    for entry in entries.flatten() {
      let path = entry.path();
      if path.is_dir() {
        stack.push(path);
      } else if path
        .extension()
        .is_some_and(|ext| ext == "tmp")
      {
        return false;
      }
    }
  }
  true
}
