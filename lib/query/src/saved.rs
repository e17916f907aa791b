use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ticketry_client::error::{Error, ErrorKind, Result};

/// A named query persisted for reuse across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  pub jql: String,
  pub created_at: DateTime<Utc>,
}

/// One YAML document per query, in a configured directory.
#[derive(Debug, Clone)]
pub struct QueryStore {
  dir: PathBuf,
}

impl QueryStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn query_path(&self, name: &str) -> PathBuf {
    self.dir.join(format!("{name}.yaml"))
  }

  pub async fn save(&self, query: &SavedQuery) -> Result<()> {
    if query.name.is_empty()
      || query.name.contains(['/', '\\'])
    {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!("'{}' is not a usable query name", query.name),
      ));
    }
    tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
      Error::new(
        ErrorKind::FilesystemError,
        format!("Failed to create {:?}", self.dir),
      )
      .with_cause(e)
    })?;
    let body = serde_yaml_ng::to_string(query).map_err(|e| {
      Error::new(
        ErrorKind::SerializationError,
        format!("Failed to serialize query '{}'", query.name),
      )
      .with_cause(e)
    })?;
    tokio::fs::write(self.query_path(&query.name), body)
      .await
      .map_err(|e| {
        Error::new(
          ErrorKind::FilesystemError,
          format!("Failed to write query '{}'", query.name),
        )
        .with_cause(e)
      })
  }

  pub async fn load(&self, name: &str) -> Result<SavedQuery> {
    let path = self.query_path(name);
    let body =
      tokio::fs::read_to_string(&path).await.map_err(|e| {
        Error::new(
          ErrorKind::NotFound,
          format!("No saved query named '{name}'"),
        )
        .with_cause(e)
      })?;
    serde_yaml_ng::from_str(&body).map_err(|e| {
      Error::new(
        ErrorKind::SerializationError,
        format!("Saved query {path:?} does not decode"),
      )
      .with_cause(e)
    })
  }

  pub async fn list(&self) -> Result<Vec<SavedQuery>> {
    let mut queries = Vec::new();
    let mut entries = match tokio::fs::read_dir(&self.dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Ok(queries);
      }
      Err(e) => {
        return Err(
          Error::new(
            ErrorKind::FilesystemError,
            format!("Failed to list {:?}", self.dir),
          )
          .with_cause(e),
        );
      }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "yaml")
        && let Ok(body) = tokio::fs::read_to_string(&path).await
        && let Ok(query) = serde_yaml_ng::from_str(&body)
      {
        queries.push(query);
      }
    }
    queries.sort_by(|a: &SavedQuery, b: &SavedQuery| {
      a.name.cmp(&b.name)
    });
    Ok(queries)
  }

  pub async fn delete(&self, name: &str) -> Result<()> {
    tokio::fs::remove_file(self.query_path(name))
      .await
      .map_err(|e| {
        Error::new(
          ErrorKind::NotFound,
          format!("No saved query named '{name}'"),
        )
        .with_cause(e)
      })
  }
}
