use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operation::SyncConfig;
use crate::error::{Error, ErrorKind, Result};

/// A named, reusable sync intent. Exactly one of `epic_key` / `jql`
/// is populated after template expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub epic_key: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub jql: Option<String>,
  pub repository: PathBuf,
  #[serde(default)]
  pub options: SyncConfig,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub usage: Option<UsageStats>,
}

impl Profile {
  /// A profile must carry exactly one intent.
  pub fn validate(&self) -> Result<()> {
    if self.name.is_empty() {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        "Profile name cannot be empty",
      ));
    }
    match (&self.epic_key, &self.jql) {
      (Some(_), Some(_)) => Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "Profile '{}' has both epic_key and jql set",
          self.name
        ),
      )),
      (None, None) => Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "Profile '{}' needs either epic_key or jql",
          self.name
        ),
      )),
      _ => Ok(()),
    }
  }

  pub fn record_usage(
    &mut self,
    duration_ms: u64,
    success: bool,
    now: DateTime<Utc>,
  ) {
    let usage = self.usage.get_or_insert_default();
    usage.run_count += 1;
    if success {
      usage.success_count += 1;
    } else {
      usage.failure_count += 1;
    }
    usage.total_duration_ms += duration_ms;
    usage.last_used = Some(now);
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
  pub run_count: u64,
  pub success_count: u64,
  pub failure_count: u64,
  pub total_duration_ms: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_used: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn profile(
    epic_key: Option<&str>,
    jql: Option<&str>,
  ) -> Profile {
    Profile {
      name: "test".into(),
      epic_key: epic_key.map(Into::into),
      jql: jql.map(Into::into),
      repository: "/tmp/repo".into(),
      ..Default::default()
    }
  }

  #[test]
  fn exactly_one_intent() {
    assert!(profile(Some("E-1"), None).validate().is_ok());
    assert!(profile(None, Some("project = X")).validate().is_ok());
    assert!(profile(None, None).validate().is_err());
    assert!(
      profile(Some("E-1"), Some("project = X")).validate().is_err()
    );
  }

  #[test]
  fn usage_accumulates() {
    let mut p = profile(Some("E-1"), None);
    let now = Utc::now();
    p.record_usage(100, true, now);
    p.record_usage(50, false, now);
    let usage = p.usage.unwrap();
    assert_eq!(usage.run_count, 2);
    assert_eq!(usage.success_count, 1);
    assert_eq!(usage.failure_count, 1);
    assert_eq!(usage.total_duration_ms, 150);
  }
}
