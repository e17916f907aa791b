//! Mapping from remote JSON payloads into [Issue] records.

use serde_json::Value;

use crate::entities::issue::{
  Issue, IssueLink, LinkDirection, Relationships, Status, User,
};
use crate::error::{Error, ErrorKind, Result};

/// Field carrying the epic link on classic tracker projects.
pub const DEFAULT_EPIC_FIELD: &str = "customfield_10014";

pub fn issue_from_remote(
  payload: &Value,
  epic_field: &str,
) -> Result<Issue> {
  let key = payload["key"].as_str().ok_or_else(|| {
    Error::new(
      ErrorKind::SerializationError,
      "Remote issue payload is missing 'key'",
    )
  })?;
  let fields = &payload["fields"];

  let relationships = parse_relationships(fields, epic_field);

  Ok(Issue {
    key: key.to_string(),
    summary: str_field(&fields["summary"]),
    description: str_field(&fields["description"]),
    status: Status {
      name: str_field(&fields["status"]["name"]),
      category: str_field(
        &fields["status"]["statusCategory"]["name"],
      ),
    },
    assignee: parse_user(&fields["assignee"]),
    reporter: parse_user(&fields["reporter"]),
    created: str_field(&fields["created"]),
    updated: str_field(&fields["updated"]),
    priority: str_field(&fields["priority"]["name"]),
    issuetype: str_field(&fields["issuetype"]["name"]),
    relationships: (!relationships.is_empty())
      .then_some(relationships),
  })
}

fn parse_relationships(
  fields: &Value,
  epic_field: &str,
) -> Relationships {
  let epic_link = fields[epic_field]
    .as_str()
    .filter(|s| !s.is_empty())
    .map(str::to_string);
  let parent_issue = fields["parent"]["key"]
    .as_str()
    .map(str::to_string);
  let subtasks = fields["subtasks"]
    .as_array()
    .map(|subtasks| {
      subtasks
        .iter()
        .filter_map(|sub| sub["key"].as_str())
        .map(str::to_string)
        .collect()
    })
    .unwrap_or_default();
  let issue_links = fields["issuelinks"]
    .as_array()
    .map(|links| {
      links.iter().filter_map(parse_issue_link).collect()
    })
    .unwrap_or_default();
  Relationships {
    epic_link,
    parent_issue,
    subtasks,
    issue_links,
  }
}

fn parse_issue_link(link: &Value) -> Option<IssueLink> {
  let link_type = str_field(&link["type"]["name"]);
  let (direction, target) =
    if let Some(inward) = link.get("inwardIssue") {
      (LinkDirection::Inward, inward)
    } else if let Some(outward) = link.get("outwardIssue") {
      (LinkDirection::Outward, outward)
    } else {
      return None;
    };
  let issue_key = target["key"].as_str()?.to_string();
  Some(IssueLink {
    link_type,
    direction,
    issue_key,
    summary: str_field(&target["fields"]["summary"]),
  })
}

fn parse_user(user: &Value) -> Option<User> {
  if user.is_null() {
    return None;
  }
  let parsed = User {
    name: str_field(&user["displayName"]),
    email: str_field(&user["emailAddress"]),
  };
  (!parsed.name.is_empty() || !parsed.email.is_empty())
    .then_some(parsed)
}

fn str_field(v: &Value) -> String {
  v.as_str().unwrap_or_default().to_string()
}
