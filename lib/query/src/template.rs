use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ticketry_client::error::{Error, ErrorKind, Result};

/// A reusable query with `{{variable}}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryTemplate {
  pub name: String,
  pub description: String,
  pub jql: String,
  pub required_variables: Vec<String>,
  pub example: String,
}

impl QueryTemplate {
  /// Substitute every placeholder. Missing variables are an
  /// error listing exactly what the caller has to provide.
  pub fn expand(
    &self,
    vars: &IndexMap<String, String>,
  ) -> Result<String> {
    let missing: Vec<&String> = self
      .required_variables
      .iter()
      .filter(|required| !vars.contains_key(*required))
      .collect();
    if !missing.is_empty() {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "Template '{}' is missing variables: {} (example: {})",
          self.name,
          missing
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", "),
          self.example
        ),
      ));
    }
    let mut expanded = self.jql.clone();
    for (name, value) in vars {
      expanded =
        expanded.replace(&format!("{{{{{name}}}}}"), value);
    }
    if let Some(leftover) = placeholder_regex()
      .find(&expanded)
    {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "Template '{}' still has unexpanded placeholder {}",
          self.name,
          leftover.as_str()
        ),
      ));
    }
    Ok(expanded)
  }
}

fn placeholder_regex() -> &'static Regex {
  static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
  PLACEHOLDER.get_or_init(|| {
    Regex::new(r"\{\{(\w+)\}\}")
      .expect("placeholder regex is valid")
  })
}

pub fn builtin_templates() -> IndexMap<String, QueryTemplate> {
  let templates = [
    QueryTemplate {
      name: "epic-issues".into(),
      description: "Every issue linked to an epic".into(),
      jql: "\"Epic Link\" = {{epic}} ORDER BY key ASC".into(),
      required_variables: vec!["epic".into()],
      example: "epic-issues epic=PROJ-100".into(),
    },
    QueryTemplate {
      name: "epic-stories".into(),
      description: "Stories linked to an epic".into(),
      jql: "\"Epic Link\" = {{epic}} AND issuetype = Story ORDER BY key ASC"
        .into(),
      required_variables: vec!["epic".into()],
      example: "epic-stories epic=PROJ-100".into(),
    },
    QueryTemplate {
      name: "project-recent".into(),
      description: "Issues updated in the last N days".into(),
      jql:
        "project = {{project}} AND updated >= -{{days}}d ORDER BY updated DESC"
          .into(),
      required_variables: vec!["project".into(), "days".into()],
      example: "project-recent project=PROJ days=14".into(),
    },
    QueryTemplate {
      name: "assignee-open".into(),
      description: "Open issues for one assignee".into(),
      jql:
        "assignee = \"{{assignee}}\" AND statusCategory != Done ORDER BY updated DESC"
          .into(),
      required_variables: vec!["assignee".into()],
      example: "assignee-open assignee=jane@example.com".into(),
    },
  ];
  templates
    .into_iter()
    .map(|template| (template.name.clone(), template))
    .collect()
}
