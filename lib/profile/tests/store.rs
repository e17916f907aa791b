//! Profile store CRUD, templates, export/import, usage.

use indexmap::IndexMap;
use profile::{ExportFilter, ImportOptions, ProfileStore};
use ticketry_client::entities::profile::Profile;
use ticketry_client::error::ErrorKind;

fn vars(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
  pairs
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn epic_profile(name: &str) -> Profile {
  Profile {
    name: name.into(),
    epic_key: Some("PROJ-100".into()),
    repository: "/tmp/repo".into(),
    tags: vec!["team-a".into()],
    ..Default::default()
  }
}

#[tokio::test]
async fn create_get_update_delete() {
  let dir = tempfile::tempdir().unwrap();
  let store = ProfileStore::new(dir.path());

  store.create(&epic_profile("alpha")).await.unwrap();
  // Names are unique.
  let err =
    store.create(&epic_profile("alpha")).await.unwrap_err();
  assert_eq!(err.kind, ErrorKind::InvalidInput);

  let mut loaded = store.get("alpha").await.unwrap();
  assert_eq!(loaded.epic_key.as_deref(), Some("PROJ-100"));

  loaded.description = "updated".into();
  store.update(&loaded).await.unwrap();
  assert_eq!(
    store.get("alpha").await.unwrap().description,
    "updated"
  );

  store.delete("alpha").await.unwrap();
  let err = store.get("alpha").await.unwrap_err();
  assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn invalid_profiles_never_persist() {
  let dir = tempfile::tempdir().unwrap();
  let store = ProfileStore::new(dir.path());
  let both = Profile {
    name: "both".into(),
    epic_key: Some("E-1".into()),
    jql: Some("project = X".into()),
    repository: "/tmp/repo".into(),
    ..Default::default()
  };
  let err = store.create(&both).await.unwrap_err();
  assert_eq!(err.kind, ErrorKind::InvalidInput);
  assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn templates_expand_into_profiles() {
  let dir = tempfile::tempdir().unwrap();
  let store = ProfileStore::new(dir.path());

  let profile = store
    .create_from_template(
      "epic-all-issues",
      "epic-sync",
      std::path::Path::new("/tmp/repo"),
      &vars(&[("epic", "PROJ-100")]),
    )
    .await
    .unwrap();
  assert_eq!(profile.epic_key.as_deref(), Some("PROJ-100"));
  assert!(profile.jql.is_none());
  assert!(store.get("epic-sync").await.is_ok());

  let stories = store
    .create_from_template(
      "epic-stories-only",
      "stories",
      std::path::Path::new("/tmp/repo"),
      &vars(&[("epic", "PROJ-100")]),
    )
    .await
    .unwrap();
  assert!(
    stories.jql.unwrap().contains("issuetype = Story")
  );

  let err = store
    .create_from_template(
      "epic-all-issues",
      "incomplete",
      std::path::Path::new("/tmp/repo"),
      &vars(&[]),
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind, ErrorKind::InvalidInput);

  let err = store
    .create_from_template(
      "no-such-template",
      "x",
      std::path::Path::new("/tmp/repo"),
      &vars(&[]),
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn export_filters_and_import_prefixes() {
  let dir = tempfile::tempdir().unwrap();
  let store = ProfileStore::new(dir.path().join("profiles"));
  store.create(&epic_profile("alpha")).await.unwrap();
  let mut other = epic_profile("beta");
  other.tags = vec!["team-b".into()];
  store.create(&other).await.unwrap();

  let export = dir.path().join("export.yaml");
  let exported = store
    .export_to_file(
      &export,
      &ExportFilter {
        tags: vec!["team-a".into()],
        ..Default::default()
      },
    )
    .await
    .unwrap();
  assert_eq!(exported, 1);

  let target = ProfileStore::new(dir.path().join("imported"));
  let report = target
    .import_from_file(
      &export,
      &ImportOptions {
        name_prefix: "team-a-".into(),
        overwrite: false,
        validate: true,
      },
    )
    .await
    .unwrap();
  assert_eq!(report.imported, vec!["team-a-alpha"]);
  assert!(target.get("team-a-alpha").await.is_ok());

  // Second import without overwrite skips.
  let report = target
    .import_from_file(
      &export,
      &ImportOptions {
        name_prefix: "team-a-".into(),
        overwrite: false,
        validate: true,
      },
    )
    .await
    .unwrap();
  assert_eq!(report.skipped, vec!["team-a-alpha"]);
}

#[tokio::test]
async fn usage_is_recorded_on_disk() {
  let dir = tempfile::tempdir().unwrap();
  let store = ProfileStore::new(dir.path());
  store.create(&epic_profile("alpha")).await.unwrap();

  store.record_usage("alpha", 1200, true).await.unwrap();
  store.record_usage("alpha", 300, false).await.unwrap();

  let usage =
    store.get("alpha").await.unwrap().usage.unwrap();
  assert_eq!(usage.run_count, 2);
  assert_eq!(usage.success_count, 1);
  assert_eq!(usage.failure_count, 1);
  assert_eq!(usage.total_duration_ms, 1500);
  assert!(usage.last_used.is_some());
}
