use std::path::Path;

use indexmap::IndexMap;
use ticketry_client::entities::profile::Profile;
use ticketry_client::error::{Error, ErrorKind, Result};

/// A built-in profile shape, expanded with user variables.
#[derive(Debug, Clone)]
pub struct ProfileTemplate {
  pub id: &'static str,
  pub description: &'static str,
  pub required_variables: &'static [&'static str],
  kind: TemplateKind,
}

#[derive(Debug, Clone, Copy)]
enum TemplateKind {
  EpicAll,
  EpicStories,
  ProjectActive,
  AssigneeSprint,
  CustomJql,
}

pub fn builtin_profile_templates() -> Vec<ProfileTemplate> {
  vec![
    ProfileTemplate {
      id: "epic-all-issues",
      description: "Every issue belonging to an epic",
      required_variables: &["epic"],
      kind: TemplateKind::EpicAll,
    },
    ProfileTemplate {
      id: "epic-stories-only",
      description: "Only the stories under an epic",
      required_variables: &["epic"],
      kind: TemplateKind::EpicStories,
    },
    ProfileTemplate {
      id: "project-active-issues",
      description: "Issues not yet done in a project",
      required_variables: &["project"],
      kind: TemplateKind::ProjectActive,
    },
    ProfileTemplate {
      id: "assignee-current-sprint",
      description: "One assignee's issues in open sprints",
      required_variables: &["assignee"],
      kind: TemplateKind::AssigneeSprint,
    },
    ProfileTemplate {
      id: "custom-jql",
      description: "A raw query of your own",
      required_variables: &["jql"],
      kind: TemplateKind::CustomJql,
    },
  ]
}

impl ProfileTemplate {
  pub fn expand(
    &self,
    name: &str,
    repository: &Path,
    vars: &IndexMap<String, String>,
  ) -> Result<Profile> {
    let missing: Vec<&&str> = self
      .required_variables
      .iter()
      .filter(|required| !vars.contains_key(**required))
      .collect();
    if !missing.is_empty() {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "Template '{}' is missing variables: {}",
          self.id,
          missing
            .iter()
            .map(|s| **s)
            .collect::<Vec<_>>()
            .join(", ")
        ),
      ));
    }
    let var = |key: &str| vars[key].clone();
    let mut profile = Profile {
      name: name.to_string(),
      description: self.description.to_string(),
      repository: repository.to_path_buf(),
      tags: vec!["template".into(), self.id.to_string()],
      ..Default::default()
    };
    match self.kind {
      TemplateKind::EpicAll => {
        profile.epic_key = Some(var("epic"));
      }
      TemplateKind::EpicStories => {
        profile.jql = Some(format!(
          "\"Epic Link\" = {} AND issuetype = Story ORDER BY key ASC",
          var("epic")
        ));
      }
      TemplateKind::ProjectActive => {
        profile.jql = Some(format!(
          "project = {} AND statusCategory != Done ORDER BY key ASC",
          var("project")
        ));
      }
      TemplateKind::AssigneeSprint => {
        profile.jql = Some(format!(
          "assignee = \"{}\" AND sprint in openSprints() ORDER BY key ASC",
          var("assignee")
        ));
      }
      TemplateKind::CustomJql => {
        profile.jql = Some(var("jql"));
      }
    }
    profile.validate()?;
    Ok(profile)
  }
}
