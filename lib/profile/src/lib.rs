//! Named, reusable sync configurations: one YAML document per
//! profile in a configured directory, plus built-in templates,
//! import/export and usage accounting.

use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;
use ticketry_client::entities::profile::Profile;
use ticketry_client::error::{Error, ErrorKind, Result};
use tracing::info;

mod template;

pub use template::{ProfileTemplate, builtin_profile_templates};

#[derive(Debug, Clone)]
pub struct ProfileStore {
  dir: PathBuf,
}

/// Which profiles an export includes. Empty filter = all.
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
  pub names: Vec<String>,
  pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
  /// Prefix every imported profile name.
  pub name_prefix: String,
  /// Replace existing profiles instead of skipping them.
  pub overwrite: bool,
  /// Reject documents that fail profile validation.
  pub validate: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
  pub imported: Vec<String>,
  pub skipped: Vec<String>,
}

impl ProfileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn profile_path(&self, name: &str) -> PathBuf {
    self.dir.join(format!("{name}.yaml"))
  }

  pub async fn create(&self, profile: &Profile) -> Result<()> {
    profile.validate()?;
    check_name(&profile.name)?;
    if self.profile_path(&profile.name).exists() {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!(
          "A profile named '{}' already exists",
          profile.name
        ),
      ));
    }
    self.write(profile).await
  }

  pub async fn update(&self, profile: &Profile) -> Result<()> {
    profile.validate()?;
    if !self.profile_path(&profile.name).exists() {
      return Err(Error::new(
        ErrorKind::NotFound,
        format!("No profile named '{}'", profile.name),
      ));
    }
    self.write(profile).await
  }

  pub async fn get(&self, name: &str) -> Result<Profile> {
    let path = self.profile_path(name);
    let body =
      tokio::fs::read_to_string(&path).await.map_err(|e| {
        Error::new(
          ErrorKind::NotFound,
          format!("No profile named '{name}'"),
        )
        .with_cause(e)
      })?;
    serde_yaml_ng::from_str(&body).map_err(|e| {
      Error::new(
        ErrorKind::SerializationError,
        format!("Profile {path:?} does not decode"),
      )
      .with_cause(e)
    })
  }

  pub async fn list(&self) -> Result<Vec<Profile>> {
    let mut profiles = Vec::new();
    let mut entries = match tokio::fs::read_dir(&self.dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Ok(profiles);
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
        && let Ok(profile) = serde_yaml_ng::from_str(&body)
      {
        profiles.push(profile);
      }
    }
    profiles.sort_by(|a: &Profile, b: &Profile| {
      a.name.cmp(&b.name)
    });
    Ok(profiles)
  }

  pub async fn delete(&self, name: &str) -> Result<()> {
    tokio::fs::remove_file(self.profile_path(name))
      .await
      .map_err(|e| {
        Error::new(
          ErrorKind::NotFound,
          format!("No profile named '{name}'"),
        )
        .with_cause(e)
      })
  }

  /// Expand a built-in template into a concrete stored profile.
  pub async fn create_from_template(
    &self,
    template_id: &str,
    name: &str,
    repository: &Path,
    vars: &IndexMap<String, String>,
  ) -> Result<Profile> {
    let template = builtin_profile_templates()
      .into_iter()
      .find(|template| template.id == template_id)
      .ok_or_else(|| {
        Error::new(
          ErrorKind::NotFound,
          format!("No profile template '{template_id}'"),
        )
      })?;
    let profile = template.expand(name, repository, vars)?;
    self.create(&profile).await?;
    Ok(profile)
  }

  /// Write the filtered profile set as one YAML document.
  pub async fn export_to_file(
    &self,
    path: &Path,
    filter: &ExportFilter,
  ) -> Result<usize> {
    let profiles: Vec<Profile> = self
      .list()
      .await?
      .into_iter()
      .filter(|profile| {
        (filter.names.is_empty()
          || filter.names.contains(&profile.name))
          && (filter.tags.is_empty()
            || profile
              .tags
              .iter()
              .any(|tag| filter.tags.contains(tag)))
      })
      .collect();
    let body =
      serde_yaml_ng::to_string(&profiles).map_err(|e| {
        Error::new(
          ErrorKind::SerializationError,
          "Failed to serialize profile export",
        )
        .with_cause(e)
      })?;
    tokio::fs::write(path, body).await.map_err(|e| {
      Error::new(
        ErrorKind::FilesystemError,
        format!("Failed to write export {path:?}"),
      )
      .with_cause(e)
    })?;
    info!("exported {} profiles to {path:?}", profiles.len());
    Ok(profiles.len())
  }

  pub async fn import_from_file(
    &self,
    path: &Path,
    opts: &ImportOptions,
  ) -> Result<ImportReport> {
    let body =
      tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::new(
          ErrorKind::NotFound,
          format!("No export file at {path:?}"),
        )
        .with_cause(e)
      })?;
    let profiles: Vec<Profile> = serde_yaml_ng::from_str(&body)
      .map_err(|e| {
        Error::new(
          ErrorKind::SerializationError,
          format!("Export file {path:?} does not decode"),
        )
        .with_cause(e)
      })?;

    let mut report = ImportReport::default();
    for mut profile in profiles {
      profile.name =
        format!("{}{}", opts.name_prefix, profile.name);
      if opts.validate && profile.validate().is_err() {
        report.skipped.push(profile.name);
        continue;
      }
      let exists = self.profile_path(&profile.name).exists();
      if exists && !opts.overwrite {
        report.skipped.push(profile.name);
        continue;
      }
      check_name(&profile.name)?;
      self.write(&profile).await?;
      report.imported.push(profile.name);
    }
    Ok(report)
  }

  /// Bump usage counters after a run driven by this profile.
  pub async fn record_usage(
    &self,
    name: &str,
    duration_ms: u64,
    success: bool,
  ) -> Result<()> {
    let mut profile = self.get(name).await?;
    profile.record_usage(duration_ms, success, Utc::now());
    self.write(&profile).await
  }

  async fn write(&self, profile: &Profile) -> Result<()> {
    tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
      Error::new(
        ErrorKind::FilesystemError,
        format!("Failed to create {:?}", self.dir),
      )
      .with_cause(e)
    })?;
    let body =
      serde_yaml_ng::to_string(profile).map_err(|e| {
        Error::new(
          ErrorKind::SerializationError,
          format!(
            "Failed to serialize profile '{}'",
            profile.name
          ),
        )
        .with_cause(e)
      })?;
    tokio::fs::write(self.profile_path(&profile.name), body)
      .await
      .map_err(|e| {
        Error::new(
          ErrorKind::FilesystemError,
          format!("Failed to write profile '{}'", profile.name),
        )
        .with_cause(e)
      })
  }
}

fn check_name(name: &str) -> Result<()> {
  if name.is_empty() || name.contains(['/', '\\']) {
    return Err(Error::new(
      ErrorKind::InvalidInput,
      format!("'{name}' is not a usable profile name"),
    ));
  }
  Ok(())
}
