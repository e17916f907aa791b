//! Discovers every issue belonging to an epic and builds the
//! issue hierarchy. Several discovery strategies exist because
//! real projects link issues to epics inconsistently; `hybrid`
//! unions them all and deduplicates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use cache::CloneCache;
use indexmap::IndexMap;
use query::QueryBuilder;
use serde::{Deserialize, Serialize};
use strum::Display;
use ticketry_client::RemoteClient;
use ticketry_client::entities::analysis::{
  AnalysisMetrics, AnalysisResult, CompletenessReport,
  HierarchyNode, UnresolvedRef,
};
use ticketry_client::entities::issue::{
  Issue, extract_project_key, valid_issue_key,
};
use ticketry_client::error::{Error, ErrorKind, Result};
use tracing::debug;

mod hierarchy;

use hierarchy::HierarchyBuilder;

/// Discovery queries fetch at most this many issues per strategy.
const DISCOVERY_MAX_RESULTS: usize = 500;

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
pub enum DiscoveryStrategy {
  /// `"Epic Link" = K`
  EpicLink,
  /// Vendor custom-field query.
  CustomField,
  /// `parent in (issuesInEpic("K"))`
  ParentLink,
  /// Walk the epic's own links and subtasks.
  LinkedIssues,
  /// Union of all strategies, deduplicated.
  #[default]
  Hybrid,
}

#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
  pub strategy: DiscoveryStrategy,
  /// Hierarchy depth cap: 0 means direct children only.
  pub max_depth: i32,
  pub use_cache: bool,
}

impl Default for AnalyzerOptions {
  fn default() -> Self {
    Self {
      strategy: DiscoveryStrategy::Hybrid,
      max_depth: 5,
      use_cache: true,
    }
  }
}

pub struct EpicAnalyzer {
  client: Arc<dyn RemoteClient>,
  builder: QueryBuilder,
  cache: CloneCache<String, Issue>,
  /// Custom-field id used by the vendor query strategy.
  custom_field_id: u32,
}

struct RunMetrics {
  metrics: AnalysisMetrics,
  started: Instant,
}

impl RunMetrics {
  fn new() -> Self {
    Self {
      metrics: AnalysisMetrics::default(),
      started: Instant::now(),
    }
  }

  fn phase_done(&mut self, name: &str) {
    let elapsed = self.started.elapsed().as_millis() as u64;
    self
      .metrics
      .phase_durations_ms
      .insert(name.to_string(), elapsed);
    self.started = Instant::now();
  }
}

impl EpicAnalyzer {
  pub fn new(client: Arc<dyn RemoteClient>) -> Self {
    Self {
      client,
      builder: QueryBuilder::new(),
      cache: CloneCache::default(),
      custom_field_id: 10014,
    }
  }

  pub fn with_custom_field_id(mut self, id: u32) -> Self {
    self.custom_field_id = id;
    self
  }

  /// Full analysis: discovery, hierarchy, counts, completeness.
  pub async fn analyze_epic(
    &self,
    epic_key: &str,
    opts: &AnalyzerOptions,
  ) -> Result<AnalysisResult> {
    let mut run = RunMetrics::new();
    let epic = self.validate_epic(epic_key, opts, &mut run).await?;
    run.phase_done("validate");

    let issues =
      self.discover(&epic, opts, &mut run).await?;
    run.phase_done("discover");
    debug!(
      "epic {epic_key}: discovered {} issues",
      issues.len()
    );

    let mut hierarchy = HierarchyBuilder::new(&issues);
    let top_level = hierarchy.top_level_nodes(opts.max_depth);

    let mut result = AnalysisResult {
      epic_key: epic_key.to_string(),
      total_issues: issues.len(),
      ..Default::default()
    };
    for node in top_level {
      match node.issue_type.as_str() {
        "story" => result.stories.push(node),
        "task" => result.tasks.push(node),
        "bug" => result.bugs.push(node),
        _ => result.direct_issues.push(node),
      }
    }

    for issue in issues.values() {
      result
        .issues_by_type
        .entry(issue.issuetype.to_lowercase())
        .or_default()
        .push(issue.key.clone());
      if !issue.status.name.is_empty() {
        *result
          .issues_by_status
          .entry(issue.status.name.clone())
          .or_default() += 1;
      }
      let rel = issue.relationships();
      if rel.epic_link.is_some() {
        *result
          .relationship_types
          .entry("epic".to_string())
          .or_default() += 1;
      }
      if rel.parent_issue.is_some() {
        *result
          .relationship_types
          .entry("parent".to_string())
          .or_default() += 1;
      }
      if !rel.subtasks.is_empty() {
        *result
          .relationship_types
          .entry("subtasks".to_string())
          .or_default() += rel.subtasks.len();
      }
      for link in &rel.issue_links {
        *result
          .relationship_types
          .entry(link.link_type.to_lowercase())
          .or_default() += 1;
      }
    }
    run.phase_done("hierarchy");

    result.completeness =
      completeness(epic_key, &epic, &issues, &hierarchy);
    run.phase_done("completeness");

    result.metrics = run.metrics;
    Ok(result)
  }

  /// The hierarchy alone: top-level nodes with subtask chains
  /// expanded to `max_depth`.
  pub async fn get_epic_hierarchy(
    &self,
    epic_key: &str,
    opts: &AnalyzerOptions,
  ) -> Result<Vec<HierarchyNode>> {
    let mut run = RunMetrics::new();
    let epic = self.validate_epic(epic_key, opts, &mut run).await?;
    let issues = self.discover(&epic, opts, &mut run).await?;
    let mut hierarchy = HierarchyBuilder::new(&issues);
    Ok(hierarchy.top_level_nodes(opts.max_depth))
  }

  async fn validate_epic(
    &self,
    epic_key: &str,
    opts: &AnalyzerOptions,
    run: &mut RunMetrics,
  ) -> Result<Issue> {
    if !valid_issue_key(epic_key) {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!("'{epic_key}' is not a valid issue key"),
      ));
    }
    if opts.max_depth < 0 {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "max_depth must be >= 0, got {}",
          opts.max_depth
        ),
      ));
    }
    let epic = self.fetch(epic_key, opts, run).await?;
    if !epic.is_epic() {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "{epic_key} is a {}, not an epic",
          epic.issuetype
        ),
      ));
    }
    Ok(epic)
  }

  async fn discover(
    &self,
    epic: &Issue,
    opts: &AnalyzerOptions,
    run: &mut RunMetrics,
  ) -> Result<IndexMap<String, Issue>> {
    let mut issues: IndexMap<String, Issue> = IndexMap::new();
    let strategies: &[DiscoveryStrategy] = match opts.strategy {
      DiscoveryStrategy::Hybrid => &[
        DiscoveryStrategy::EpicLink,
        DiscoveryStrategy::CustomField,
        DiscoveryStrategy::ParentLink,
        DiscoveryStrategy::LinkedIssues,
      ],
      ref single => std::slice::from_ref(single),
    };
    for strategy in strategies {
      match strategy {
        DiscoveryStrategy::LinkedIssues => {
          self
            .discover_linked(epic, opts, run, &mut issues)
            .await;
        }
        strategy => {
          let jql = self.strategy_jql(*strategy, &epic.key)?;
          run.metrics.api_calls += 1;
          let results = self
            .client
            .search(&jql, DISCOVERY_MAX_RESULTS)
            .await?;
          for issue in results.issues {
            issues.entry(issue.key.clone()).or_insert(issue);
          }
        }
      }
    }
    Ok(issues)
  }

  /// Walk the epic's own subtasks and links; a reference that
  /// fails to resolve is skipped here and surfaces later in the
  /// completeness report.
  async fn discover_linked(
    &self,
    epic: &Issue,
    opts: &AnalyzerOptions,
    run: &mut RunMetrics,
    issues: &mut IndexMap<String, Issue>,
  ) {
    let rel = epic.relationships();
    let referenced: Vec<&String> = rel
      .subtasks
      .iter()
      .chain(rel.issue_links.iter().map(|link| &link.issue_key))
      .collect();
    for key in referenced {
      if issues.contains_key(key) {
        continue;
      }
      match self.fetch(key, opts, run).await {
        Ok(issue) => {
          issues.insert(issue.key.clone(), issue);
        }
        Err(e) if e.kind == ErrorKind::NotFound => {}
        Err(e) => {
          debug!("linked issue {key} failed to resolve: {e:#}")
        }
      }
    }
  }

  fn strategy_jql(
    &self,
    strategy: DiscoveryStrategy,
    epic_key: &str,
  ) -> Result<String> {
    let project = extract_project_key(epic_key);
    let jql = match strategy {
      DiscoveryStrategy::EpicLink => format!(
        "\"Epic Link\" = {epic_key} AND project = {project} ORDER BY key ASC"
      ),
      DiscoveryStrategy::CustomField => format!(
        "cf[{}] = {epic_key} AND project = {project} ORDER BY key ASC",
        self.custom_field_id
      ),
      DiscoveryStrategy::ParentLink => format!(
        "parent in (issuesInEpic(\"{epic_key}\")) AND project = {project} ORDER BY key ASC"
      ),
      DiscoveryStrategy::LinkedIssues
      | DiscoveryStrategy::Hybrid => {
        return Err(Error::new(
          ErrorKind::InvalidInput,
          format!("{strategy} does not compile to a query"),
        ));
      }
    };
    let validation = self.builder.validate_query(&jql);
    if !validation.valid {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        validation.errors.join(" | "),
      ));
    }
    Ok(jql)
  }

  async fn fetch(
    &self,
    key: &str,
    opts: &AnalyzerOptions,
    run: &mut RunMetrics,
  ) -> Result<Issue> {
    if opts.use_cache {
      if let Some(issue) =
        self.cache.get(&key.to_string()).await
      {
        run.metrics.cache_hits += 1;
        return Ok(issue);
      }
      run.metrics.cache_misses += 1;
    }
    run.metrics.api_calls += 1;
    let issue = self.client.get_issue(key).await?;
    if opts.use_cache {
      self.cache.insert(key.to_string(), issue.clone()).await;
    }
    Ok(issue)
  }
}

fn completeness(
  epic_key: &str,
  epic: &Issue,
  issues: &IndexMap<String, Issue>,
  hierarchy: &HierarchyBuilder<'_>,
) -> CompletenessReport {
  let mut report = CompletenessReport {
    cycles: hierarchy.cycles().to_vec(),
    ..Default::default()
  };
  let resolved: HashSet<&String> = issues.keys().collect();
  let mut push = |source: &str, target: &String, kind: &str| {
    if target != epic_key && !resolved.contains(target) {
      report.unresolved.push(UnresolvedRef {
        source: source.to_string(),
        target: target.clone(),
        kind: kind.to_string(),
      });
    }
  };
  for issue in
    std::iter::once(epic).chain(issues.values())
  {
    let rel = issue.relationships();
    if let Some(parent) = &rel.parent_issue {
      push(&issue.key, parent, "parent");
    }
    for subtask in &rel.subtasks {
      push(&issue.key, subtask, "subtask");
    }
    for link in &rel.issue_links {
      push(&issue.key, &link.issue_key, "issue_link");
    }
  }
  for unresolved in &report.unresolved {
    report.recommendations.push(format!(
      "Sync {} to repair the {} reference from {}",
      unresolved.target, unresolved.kind, unresolved.source
    ));
  }
  for (from, to) in &report.cycles {
    report.recommendations.push(format!(
      "Break the hierarchy cycle between {from} and {to}"
    ));
  }
  report
}
