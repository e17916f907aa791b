use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One remote ticket record, immutable per fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
  /// Primary identifier, `<PROJECT>-<NUMBER>`.
  pub key: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub summary: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  #[serde(default)]
  pub status: Status,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assignee: Option<User>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reporter: Option<User>,
  /// Creation timestamp, preserved verbatim as received.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub created: String,
  /// Last-updated timestamp, preserved verbatim as received.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub updated: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub priority: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub issuetype: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub relationships: Option<Relationships>,
}

impl Issue {
  /// The `<PROJECT>` prefix of the key.
  pub fn project_key(&self) -> &str {
    extract_project_key(&self.key)
  }

  /// Absent relationships are empty relationships,
  /// never a processing error.
  pub fn relationships(&self) -> &Relationships {
    static EMPTY: OnceLock<Relationships> = OnceLock::new();
    self
      .relationships
      .as_ref()
      .unwrap_or_else(|| EMPTY.get_or_init(Relationships::default))
  }

  pub fn is_epic(&self) -> bool {
    self.issuetype.eq_ignore_ascii_case("epic")
  }

  /// The remote `updated` timestamp, if it parses.
  pub fn updated_at(&self) -> Option<DateTime<Utc>> {
    parse_remote_timestamp(&self.updated)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub category: String,
}

/// Assignee / reporter. Empty fields mean "not present".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationships {
  /// Key of the epic this issue belongs to.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub epic_link: Option<String>,
  /// Key of the parent, for subtasks.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_issue: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub subtasks: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub issue_links: Vec<IssueLink>,
}

impl Relationships {
  pub fn is_empty(&self) -> bool {
    self.epic_link.is_none()
      && self.parent_issue.is_none()
      && self.subtasks.is_empty()
      && self.issue_links.is_empty()
  }
}

/// One directional typed link to another issue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueLink {
  #[serde(rename = "type")]
  pub link_type: String,
  pub direction: LinkDirection,
  pub issue_key: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub summary: String,
}

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
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LinkDirection {
  #[default]
  Inward,
  Outward,
}

/// The `<PROJECT>` prefix before the first `-`.
/// `"A-B-1"` extracts `"A"`; the empty key extracts `""`.
pub fn extract_project_key(key: &str) -> &str {
  key.split('-').next().unwrap_or("")
}

/// Issue keys match `^[A-Z][A-Z0-9]*-\d+$`.
pub fn valid_issue_key(key: &str) -> bool {
  static KEY_REGEX: OnceLock<Regex> = OnceLock::new();
  KEY_REGEX
    .get_or_init(|| {
      Regex::new(r"^[A-Z][A-Z0-9]*-\d+$")
        .expect("issue key regex is valid")
    })
    .is_match(key)
}

/// Remote timestamps arrive in a handful of ISO-8601 shapes.
/// Tried in order; unparseable strings yield `None`, which only
/// disables the incremental-by-timestamp optimization.
pub fn parse_remote_timestamp(s: &str) -> Option<DateTime<Utc>> {
  if s.is_empty() {
    return None;
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  // Numeric offsets without a colon, eg `+0000`.
  for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z"] {
    if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
      return Some(dt.with_timezone(&Utc));
    }
  }
  // No offset at all: treat as UTC.
  for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
      return Some(dt.and_utc());
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn project_key_extraction() {
    assert_eq!(extract_project_key("X-123"), "X");
    assert_eq!(extract_project_key("A-B-1"), "A");
    assert_eq!(extract_project_key(""), "");
    assert_eq!(extract_project_key("NODASH"), "NODASH");
  }

  #[test]
  fn key_validation() {
    assert!(valid_issue_key("PROJ-123"));
    assert!(valid_issue_key("A2-1"));
    assert!(!valid_issue_key("proj-123"));
    assert!(!valid_issue_key("PROJ-"));
    assert!(!valid_issue_key("PROJ-12a"));
    assert!(!valid_issue_key("2PROJ-12"));
    assert!(!valid_issue_key(""));
  }

  #[test]
  fn timestamp_variants() {
    let expect = "2024-01-02T15:30:00Z";
    for s in [
      "2024-01-02T15:30:00.000Z",
      "2024-01-02T15:30:00Z",
      "2024-01-02T15:30:00.000+0000",
      "2024-01-02T15:30:00+00:00",
      "2024-01-02T15:30:00",
    ] {
      let parsed = parse_remote_timestamp(s)
        .unwrap_or_else(|| panic!("failed to parse {s}"));
      assert_eq!(
        parsed,
        DateTime::parse_from_rfc3339(expect).unwrap(),
        "variant {s}"
      );
    }
    assert_eq!(parse_remote_timestamp("not a time"), None);
    assert_eq!(parse_remote_timestamp(""), None);
  }

  #[test]
  fn absent_relationships_are_empty() {
    let issue = Issue {
      key: "PROJ-1".into(),
      ..Default::default()
    };
    assert!(issue.relationships().is_empty());
  }
}
