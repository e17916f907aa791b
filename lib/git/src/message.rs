use ticketry_client::entities::issue::{Issue, User};

/// Conventional-commit type for an issue type.
pub fn commit_type(issuetype: &str) -> &'static str {
  if issuetype.eq_ignore_ascii_case("bug") {
    "fix"
  } else if issuetype.eq_ignore_ascii_case("documentation") {
    "docs"
  } else if issuetype.eq_ignore_ascii_case("test") {
    "test"
  } else {
    // Story / Task / Epic / Improvement / Enhancement and
    // anything unrecognized.
    "feat"
  }
}

/// `<type>(<project>): add issue <KEY> - <summary>`
pub fn commit_subject(issue: &Issue) -> String {
  format!(
    "{}({}): add issue {} - {}",
    commit_type(&issue.issuetype),
    issue.project_key(),
    issue.key,
    issue.summary
  )
}

/// Full commit message: subject plus the fixed metadata block.
pub fn commit_message(issue: &Issue) -> String {
  format!(
    "{}\n\nIssue Details:\n- Type: {}\n- Status: {}\n- Priority: {}\n- Assignee: {}\n- Reporter: {}\n- Created: {}\n- Updated: {}\n",
    commit_subject(issue),
    issue.issuetype,
    issue.status.name,
    issue.priority,
    format_person(issue.assignee.as_ref()),
    format_person(issue.reporter.as_ref()),
    issue.created,
    issue.updated,
  )
}

fn format_person(user: Option<&User>) -> String {
  let Some(user) = user else {
    return "Unassigned".to_string();
  };
  match (!user.name.is_empty(), !user.email.is_empty()) {
    (true, true) => format!("{} <{}>", user.name, user.email),
    (true, false) => user.name.clone(),
    (false, true) => user.email.clone(),
    (false, false) => "Unassigned".to_string(),
  }
}
