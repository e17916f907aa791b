//! Incremental planning against the state document.

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use ticketry_client::entities::issue::Issue;
use ticketry_client::entities::state::{IssueState, SyncState};

#[derive(Debug, Clone, Default)]
pub struct ChangedIssuesOptions {
  /// Select every tracked issue regardless of timestamps.
  pub force: bool,
  /// Select issues whose remote update is newer than this.
  pub since: Option<DateTime<Utc>>,
  /// Restrict to one project key.
  pub project: Option<String>,
  /// Also select issues not synced within this window.
  pub max_age: Option<TimeDelta>,
}

/// Keys that an incremental sync should fetch: forced, never
/// synced, updated after `since`, or stale past `max_age`.
pub fn get_changed_issues(
  state: &SyncState,
  opts: &ChangedIssuesOptions,
  now: DateTime<Utc>,
) -> Vec<String> {
  state
    .issues
    .iter()
    .filter(|(_, issue_state)| {
      opts
        .project
        .as_ref()
        .is_none_or(|project| &issue_state.project_key == project)
    })
    .filter(|(_, issue_state)| {
      if opts.force || issue_state.last_synced.is_none() {
        return true;
      }
      if let Some(since) = opts.since
        && issue_state
          .last_updated
          .is_some_and(|updated| updated > since)
      {
        return true;
      }
      if let Some(max_age) = opts.max_age
        && issue_state
          .last_synced
          .is_some_and(|synced| now - synced > max_age)
      {
        return true;
      }
      false
    })
    .map(|(key, _)| key.clone())
    .collect()
}

/// Whether a freshly fetched issue differs from its tracked
/// record. Unparseable remote timestamps always sync: they only
/// lose the skip optimization, never the issue.
pub fn should_sync_issue(state: &SyncState, issue: &Issue) -> bool {
  should_sync_issue_snapshot(&state.issues, issue)
}

/// Same check over a read-only snapshot of the issue map, for
/// workers that never touch the state document itself.
pub fn should_sync_issue_snapshot(
  issues: &IndexMap<String, IssueState>,
  issue: &Issue,
) -> bool {
  let Some(issue_state) = issues.get(&issue.key) else {
    return true;
  };
  match (issue.updated_at(), issue_state.last_updated) {
    (Some(updated), Some(last)) => updated > last,
    _ => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ticketry_client::entities::state::{
    IssueState, RepositoryInfo,
  };

  fn state_with(
    entries: Vec<(&str, IssueState)>,
  ) -> SyncState {
    let mut state = SyncState::new(
      RepositoryInfo {
        path: "/repo".into(),
        ..Default::default()
      },
      Utc::now(),
    );
    for (key, issue_state) in entries {
      state.issues.insert(key.to_string(), issue_state);
    }
    state
  }

  fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
  }

  #[test]
  fn never_synced_issues_are_always_selected() {
    let state = state_with(vec![(
      "P-1",
      IssueState {
        project_key: "P".into(),
        last_synced: None,
        ..Default::default()
      },
    )]);
    let changed = get_changed_issues(
      &state,
      &ChangedIssuesOptions::default(),
      Utc::now(),
    );
    assert_eq!(changed, vec!["P-1"]);
  }

  #[test]
  fn since_filter_selects_newer_updates() {
    let state = state_with(vec![
      (
        "P-1",
        IssueState {
          project_key: "P".into(),
          last_synced: Some(ts("2024-01-03T00:00:00Z")),
          last_updated: Some(ts("2024-01-02T00:00:00Z")),
          ..Default::default()
        },
      ),
      (
        "P-2",
        IssueState {
          project_key: "P".into(),
          last_synced: Some(ts("2024-01-03T00:00:00Z")),
          last_updated: Some(ts("2024-01-04T00:00:00Z")),
          ..Default::default()
        },
      ),
    ]);
    let changed = get_changed_issues(
      &state,
      &ChangedIssuesOptions {
        since: Some(ts("2024-01-03T00:00:00Z")),
        ..Default::default()
      },
      Utc::now(),
    );
    assert_eq!(changed, vec!["P-2"]);
  }

  #[test]
  fn force_and_project_filters() {
    let synced = IssueState {
      project_key: "P".into(),
      last_synced: Some(ts("2024-01-03T00:00:00Z")),
      last_updated: Some(ts("2024-01-01T00:00:00Z")),
      ..Default::default()
    };
    let mut other = synced.clone();
    other.project_key = "Q".into();
    let state =
      state_with(vec![("P-1", synced), ("Q-1", other)]);

    let changed = get_changed_issues(
      &state,
      &ChangedIssuesOptions {
        force: true,
        project: Some("P".into()),
        ..Default::default()
      },
      Utc::now(),
    );
    assert_eq!(changed, vec!["P-1"]);
  }

  #[test]
  fn max_age_selects_stale_issues() {
    let state = state_with(vec![(
      "P-1",
      IssueState {
        project_key: "P".into(),
        last_synced: Some(ts("2024-01-01T00:00:00Z")),
        last_updated: Some(ts("2023-12-01T00:00:00Z")),
        ..Default::default()
      },
    )]);
    let now = ts("2024-02-01T00:00:00Z");
    let fresh = get_changed_issues(
      &state,
      &ChangedIssuesOptions {
        max_age: Some(TimeDelta::days(60)),
        ..Default::default()
      },
      now,
    );
    assert!(fresh.is_empty());
    let stale = get_changed_issues(
      &state,
      &ChangedIssuesOptions {
        max_age: Some(TimeDelta::days(7)),
        ..Default::default()
      },
      now,
    );
    assert_eq!(stale, vec!["P-1"]);
  }

  #[test]
  fn should_sync_tracks_remote_updates() {
    let state = state_with(vec![(
      "P-1",
      IssueState {
        project_key: "P".into(),
        last_synced: Some(ts("2024-01-02T16:00:00Z")),
        last_updated: Some(ts("2024-01-02T15:30:00Z")),
        ..Default::default()
      },
    )]);

    let mut issue = Issue {
      key: "P-1".into(),
      updated: "2024-01-02T15:30:00.000Z".into(),
      ..Default::default()
    };
    assert!(!should_sync_issue(&state, &issue));

    issue.updated = "2024-01-05T09:00:00.000Z".into();
    assert!(should_sync_issue(&state, &issue));

    // Unparseable timestamp: sync rather than risk skipping.
    issue.updated = "whenever".into();
    assert!(should_sync_issue(&state, &issue));

    // Unknown issue: always sync.
    let unknown = Issue {
      key: "P-99".into(),
      ..Default::default()
    };
    assert!(should_sync_issue(&state, &unknown));
  }
}
