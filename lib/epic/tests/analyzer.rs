//! Epic discovery end to end against the scripted mock client.

use std::sync::Arc;

use epic::{AnalyzerOptions, DiscoveryStrategy, EpicAnalyzer};
use ticketry_client::entities::issue::{
  Issue, Relationships, Status,
};
use ticketry_client::error::ErrorKind;
use ticketry_client::mock::MockTrackerClient;

fn issue(
  key: &str,
  issuetype: &str,
  status: &str,
  relationships: Option<Relationships>,
) -> Issue {
  Issue {
    key: key.into(),
    summary: format!("Summary {key}"),
    issuetype: issuetype.into(),
    status: Status {
      name: status.into(),
      ..Default::default()
    },
    relationships,
    ..Default::default()
  }
}

fn seeded_client() -> Arc<MockTrackerClient> {
  let client = MockTrackerClient::new();
  client.insert_issue(issue("E-1", "Epic", "Open", None));
  client.insert_issue(issue(
    "E-2",
    "Story",
    "Open",
    Some(Relationships {
      epic_link: Some("E-1".into()),
      ..Default::default()
    }),
  ));
  client.insert_issue(issue(
    "E-3",
    "Task",
    "In Progress",
    Some(Relationships {
      epic_link: Some("E-1".into()),
      subtasks: vec!["E-4".into(), "E-9".into()],
      ..Default::default()
    }),
  ));
  client.insert_issue(issue(
    "E-4",
    "Sub-task",
    "Done",
    Some(Relationships {
      epic_link: Some("E-1".into()),
      parent_issue: Some("E-3".into()),
      ..Default::default()
    }),
  ));

  client
    .script_search("\"Epic Link\" = E-1", ["E-2", "E-3", "E-4"]);
  client.script_search("cf[10014] = E-1", ["E-2"]);
  client.script_search(
    "parent in (issuesInEpic(\"E-1\"))",
    ["E-4"],
  );
  Arc::new(client)
}

#[tokio::test]
async fn hybrid_discovery_unions_and_dedups() {
  let client = seeded_client();
  let analyzer = EpicAnalyzer::new(client.clone());

  let result = analyzer
    .analyze_epic("E-1", &AnalyzerOptions::default())
    .await
    .unwrap();

  assert_eq!(result.epic_key, "E-1");
  assert_eq!(result.total_issues, 3);
  assert_eq!(result.issues_by_type["story"], vec!["E-2"]);
  assert_eq!(result.issues_by_type["task"], vec!["E-3"]);
  assert_eq!(result.issues_by_type["sub-task"], vec!["E-4"]);
  assert_eq!(result.issues_by_status["Open"], 1);
  assert_eq!(result.issues_by_status["In Progress"], 1);
  assert_eq!(result.issues_by_status["Done"], 1);

  assert_eq!(result.stories.len(), 1);
  assert_eq!(result.tasks.len(), 1);
  assert!(result.bugs.is_empty());
  // E-4 nests under E-3, so it is not top-level.
  assert!(result.direct_issues.is_empty());
  assert_eq!(result.tasks[0].subtasks[0].issue_key, "E-4");

  assert_eq!(result.relationship_types["epic"], 3);
  assert_eq!(result.relationship_types["parent"], 1);
  assert_eq!(result.relationship_types["subtasks"], 2);

  // E-9 never resolved anywhere.
  assert_eq!(result.completeness.unresolved.len(), 1);
  assert_eq!(result.completeness.unresolved[0].target, "E-9");
  assert_eq!(result.completeness.unresolved[0].kind, "subtask");
  assert!(
    result.completeness.recommendations[0].contains("E-9")
  );

  assert!(result.metrics.api_calls >= 4);
  assert!(
    result
      .metrics
      .phase_durations_ms
      .contains_key("discover")
  );
}

#[tokio::test]
async fn single_strategy_uses_only_its_query() {
  let client = seeded_client();
  let analyzer = EpicAnalyzer::new(client.clone());

  let result = analyzer
    .analyze_epic(
      "E-1",
      &AnalyzerOptions {
        strategy: DiscoveryStrategy::ParentLink,
        ..Default::default()
      },
    )
    .await
    .unwrap();
  assert_eq!(result.total_issues, 1);
  assert!(result.issues_by_type.contains_key("sub-task"));
  assert_eq!(client.search_calls(), 1);
}

#[tokio::test]
async fn cache_dedups_fetches_across_analyses() {
  let client = seeded_client();
  let analyzer = EpicAnalyzer::new(client.clone());
  let opts = AnalyzerOptions::default();

  let first =
    analyzer.analyze_epic("E-1", &opts).await.unwrap();
  assert_eq!(first.metrics.cache_hits, 0);
  let calls_after_first = client.get_calls();

  let second =
    analyzer.analyze_epic("E-1", &opts).await.unwrap();
  assert!(second.metrics.cache_hits > 0);
  // The epic itself came from cache the second time.
  assert_eq!(client.get_calls(), calls_after_first);
}

#[tokio::test]
async fn non_epic_inputs_are_refused() {
  let client = seeded_client();
  let analyzer = EpicAnalyzer::new(client);
  let err = analyzer
    .analyze_epic("E-2", &AnalyzerOptions::default())
    .await
    .unwrap_err();
  assert_eq!(err.kind, ErrorKind::InvalidInput);
  assert!(err.message.contains("not an epic"));
}

#[tokio::test]
async fn negative_depth_is_rejected() {
  let client = seeded_client();
  let analyzer = EpicAnalyzer::new(client);
  let err = analyzer
    .get_epic_hierarchy(
      "E-1",
      &AnalyzerOptions {
        max_depth: -1,
        ..Default::default()
      },
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn hierarchy_depth_is_capped() {
  let client = seeded_client();
  let analyzer = EpicAnalyzer::new(client);

  let shallow = analyzer
    .get_epic_hierarchy(
      "E-1",
      &AnalyzerOptions {
        max_depth: 0,
        ..Default::default()
      },
    )
    .await
    .unwrap();
  let task = shallow
    .iter()
    .find(|node| node.issue_key == "E-3")
    .unwrap();
  assert!(task.subtasks.is_empty());

  let deep = analyzer
    .get_epic_hierarchy("E-1", &AnalyzerOptions::default())
    .await
    .unwrap();
  let task = deep
    .iter()
    .find(|node| node.issue_key == "E-3")
    .unwrap();
  assert_eq!(task.subtasks.len(), 1);
}
