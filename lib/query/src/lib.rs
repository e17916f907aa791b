//! Compiles sync intent (epic, template + variables, fragments)
//! into the remote query dialect, with validation, preview and
//! optimization passes. The dialect itself is passed through
//! unmodified; only the epic-membership clauses are synthesized.

use std::time::Instant;

use indexmap::IndexMap;
use ticketry_client::entities::issue::{
  extract_project_key, valid_issue_key,
};
use ticketry_client::error::{Error, ErrorKind, Result};
use ticketry_client::RemoteClient;

mod saved;
mod template;

pub use saved::{QueryStore, SavedQuery};
pub use template::QueryTemplate;

/// Preview probes fetch at most this many issues for breakdowns.
const PREVIEW_SAMPLE_SIZE: usize = 50;

pub struct QueryBuilder {
  templates: IndexMap<String, QueryTemplate>,
}

impl Default for QueryBuilder {
  fn default() -> Self {
    Self {
      templates: template::builtin_templates(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryValidation {
  pub valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
  pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryPreview {
  pub total: usize,
  pub execution_time_ms: u64,
  pub by_project: IndexMap<String, usize>,
  pub by_status: IndexMap<String, usize>,
  pub by_type: IndexMap<String, usize>,
}

/// Conjunctive clause inputs for `build_from_fragments`.
#[derive(Debug, Clone, Default)]
pub struct QueryFragments {
  pub project: Option<String>,
  pub statuses: Vec<String>,
  pub assignee: Option<String>,
  pub issue_types: Vec<String>,
  /// Relative or absolute bound on `updated`, eg `-14d`.
  pub updated_after: Option<String>,
  pub updated_before: Option<String>,
}

impl QueryBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Both epic-membership clauses, OR-ed, constrained to the
  /// epic's project and ordered by key.
  pub fn build_epic_query(&self, epic_key: &str) -> Result<String> {
    if !valid_issue_key(epic_key) {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!("'{epic_key}' is not a valid issue key"),
      ));
    }
    let project = extract_project_key(epic_key);
    Ok(format!(
      "(\"Epic Link\" = {epic_key} OR parent in (issuesInEpic(\"{epic_key}\"))) AND project = {project} ORDER BY key ASC"
    ))
  }

  pub fn build_from_template(
    &self,
    name: &str,
    vars: &IndexMap<String, String>,
  ) -> Result<String> {
    let template = self.templates.get(name).ok_or_else(|| {
      Error::new(
        ErrorKind::NotFound,
        format!(
          "No query template named '{name}'. Known templates: {}",
          self
            .templates
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
        ),
      )
    })?;
    template.expand(vars)
  }

  /// User templates shadow nothing: a name collision is an error.
  pub fn register_template(
    &mut self,
    template: QueryTemplate,
  ) -> Result<()> {
    if self.templates.contains_key(&template.name) {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "A template named '{}' already exists",
          template.name
        ),
      ));
    }
    self.templates.insert(template.name.clone(), template);
    Ok(())
  }

  pub fn templates(
    &self,
  ) -> impl Iterator<Item = &QueryTemplate> {
    self.templates.values()
  }

  pub fn build_from_fragments(
    &self,
    fragments: &QueryFragments,
  ) -> Result<String> {
    let mut clauses = Vec::new();
    if let Some(project) = &fragments.project {
      clauses.push(format!("project = {project}"));
    }
    if !fragments.statuses.is_empty() {
      clauses
        .push(format!("status IN ({})", quoted(&fragments.statuses)));
    }
    if let Some(assignee) = &fragments.assignee {
      clauses.push(format!("assignee = \"{assignee}\""));
    }
    if !fragments.issue_types.is_empty() {
      clauses.push(format!(
        "issuetype IN ({})",
        quoted(&fragments.issue_types)
      ));
    }
    if let Some(after) = &fragments.updated_after {
      clauses.push(format!("updated >= \"{after}\""));
    }
    if let Some(before) = &fragments.updated_before {
      clauses.push(format!("updated <= \"{before}\""));
    }
    if clauses.is_empty() {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        "At least one query fragment is required",
      ));
    }
    Ok(format!("{} ORDER BY key ASC", clauses.join(" AND ")))
  }

  pub fn validate_query(&self, jql: &str) -> QueryValidation {
    let mut validation = QueryValidation::default();
    let trimmed = jql.trim();
    if trimmed.is_empty() {
      validation.errors.push("Query is empty".to_string());
      return validation;
    }
    if !balanced(trimmed, '(', ')') {
      validation
        .errors
        .push("Unbalanced parentheses".to_string());
    }
    if trimmed.matches('"').count() % 2 != 0 {
      validation.errors.push("Unbalanced quotes".to_string());
    }

    let lowered = trimmed.to_lowercase();
    let constrained = ["project", "key", "epic link", "parent", "issuesinepic"]
      .iter()
      .any(|anchor| lowered.contains(anchor));
    if !constrained {
      validation.warnings.push(
        "No project or key constraint; result set is likely unbounded"
          .to_string(),
      );
    }
    if !lowered.contains("order by") {
      validation.suggestions.push(
        "Add an ORDER BY clause for a stable sync order"
          .to_string(),
      );
    }
    if let Some(position) = clause_position(trimmed, "project =")
      && position > 0
    {
      validation.suggestions.push(
        "Move the project clause first; it is the most selective"
          .to_string(),
      );
    }

    validation.valid = validation.errors.is_empty();
    validation
  }

  /// Reorders top-level AND clauses so the most selective come
  /// first. Never changes which issues match.
  pub fn optimize_query(&self, jql: &str) -> String {
    let (body, order_by) = split_order_by(jql);
    let clauses = split_top_level_and(body);
    if clauses.len() < 2 {
      return jql.to_string();
    }
    let mut ranked: Vec<(usize, &str)> = clauses
      .iter()
      .map(|clause| (selectivity_rank(clause), *clause))
      .collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    let reordered = ranked
      .into_iter()
      .map(|(_, clause)| clause)
      .collect::<Vec<_>>()
      .join(" AND ");
    match order_by {
      Some(order_by) => format!("{reordered} {order_by}"),
      None => reordered,
    }
  }

  /// Bounded probe against the remote service.
  pub async fn preview_query(
    &self,
    client: &dyn RemoteClient,
    jql: &str,
  ) -> Result<QueryPreview> {
    let validation = self.validate_query(jql);
    if !validation.valid {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        validation.errors.join(" | "),
      ));
    }
    let started = Instant::now();
    let results =
      client.search(jql, PREVIEW_SAMPLE_SIZE).await?;
    let mut preview = QueryPreview {
      total: results.total,
      execution_time_ms: started.elapsed().as_millis() as u64,
      ..Default::default()
    };
    for issue in &results.issues {
      *preview
        .by_project
        .entry(issue.project_key().to_string())
        .or_default() += 1;
      if !issue.status.name.is_empty() {
        *preview
          .by_status
          .entry(issue.status.name.clone())
          .or_default() += 1;
      }
      if !issue.issuetype.is_empty() {
        *preview
          .by_type
          .entry(issue.issuetype.to_lowercase())
          .or_default() += 1;
      }
    }
    Ok(preview)
  }
}

fn quoted(values: &[String]) -> String {
  values
    .iter()
    .map(|value| format!("\"{value}\""))
    .collect::<Vec<_>>()
    .join(", ")
}

fn balanced(s: &str, open: char, close: char) -> bool {
  let mut depth = 0i64;
  let mut in_quotes = false;
  for c in s.chars() {
    match c {
      '"' => in_quotes = !in_quotes,
      c if c == open && !in_quotes => depth += 1,
      c if c == close && !in_quotes => depth -= 1,
      _ => {}
    }
    if depth < 0 {
      return false;
    }
  }
  depth == 0
}

/// Index of the top-level clause containing `needle`, if any.
fn clause_position(jql: &str, needle: &str) -> Option<usize> {
  let (body, _) = split_order_by(jql);
  split_top_level_and(body)
    .iter()
    .position(|clause| clause.to_lowercase().contains(needle))
}

fn split_order_by(jql: &str) -> (&str, Option<&str>) {
  let lowered = jql.to_lowercase();
  match lowered.find("order by") {
    Some(at) => (jql[..at].trim_end(), Some(jql[at..].trim())),
    None => (jql.trim(), None),
  }
}

/// Split on ` AND ` outside quotes and parentheses.
fn split_top_level_and(body: &str) -> Vec<&str> {
  let mut clauses = Vec::new();
  let mut depth = 0i64;
  let mut in_quotes = false;
  let mut start = 0;
  let bytes = body.as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'"' => in_quotes = !in_quotes,
      b'(' if !in_quotes => depth += 1,
      b')' if !in_quotes => depth -= 1,
      _ => {}
    }
    if !in_quotes
      && depth == 0
      && bytes[i] == b' '
      && body.len() - i >= 5
      && body[i..i + 5].eq_ignore_ascii_case(" AND ")
    {
      clauses.push(body[start..i].trim());
      start = i + 5;
      i += 5;
      continue;
    }
    i += 1;
  }
  let tail = body[start..].trim();
  if !tail.is_empty() {
    clauses.push(tail);
  }
  clauses
}

fn selectivity_rank(clause: &str) -> usize {
  let lowered = clause.to_lowercase();
  if lowered.contains("key ") || lowered.contains("key=") {
    0
  } else if lowered.contains("project") {
    1
  } else if lowered.contains("epic link")
    || lowered.contains("issuesinepic")
    || lowered.contains("parent")
  {
    2
  } else {
    3
  }
}
