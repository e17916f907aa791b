use anyhow::{Context, bail};
use colored::Colorize;
use comfy_table::Table;
use indexmap::IndexMap;
use profile::{
  ExportFilter, ImportOptions, ProfileStore,
  builtin_profile_templates,
};
use ticketry_client::entities::profile::Profile;

use crate::args::ProfileCommand;
use crate::command::resolve_repo;
use crate::config::cli_config;

pub async fn run(
  command: &ProfileCommand,
) -> anyhow::Result<bool> {
  let store = ProfileStore::new(&cli_config().profile_dir);
  match command {
    ProfileCommand::Create {
      name,
      template,
      epic,
      jql,
      repo,
      var,
    } => {
      let repo_path = resolve_repo(repo)?;
      let profile = if let Some(template_id) = template {
        store
          .create_from_template(
            template_id,
            name,
            &repo_path,
            &parse_vars(var)?,
          )
          .await?
      } else {
        let profile = Profile {
          name: name.clone(),
          epic_key: epic.clone(),
          jql: jql.clone(),
          repository: repo_path,
          ..Default::default()
        };
        store.create(&profile).await?;
        profile
      };
      println!(
        "{} profile '{}'",
        "created".green(),
        profile.name
      );
    }
    ProfileCommand::List => {
      let profiles = store.list().await?;
      if profiles.is_empty() {
        println!("no profiles stored");
        return Ok(true);
      }
      let mut table = Table::new();
      table.set_header(["Name", "Intent", "Repository", "Runs"]);
      for profile in profiles {
        let intent = profile
          .epic_key
          .map(|epic| format!("epic {epic}"))
          .or(profile.jql)
          .unwrap_or_default();
        table.add_row([
          profile.name,
          intent,
          profile.repository.display().to_string(),
          profile
            .usage
            .map(|usage| usage.run_count.to_string())
            .unwrap_or_else(|| "0".into()),
        ]);
      }
      println!("{table}");
    }
    ProfileCommand::Show { name } => {
      let profile = store.get(name).await?;
      println!(
        "{}",
        serde_yaml_ng::to_string(&profile)
          .context("failed to render profile")?
      );
    }
    ProfileCommand::Delete { name } => {
      store.delete(name).await?;
      println!("{} profile '{name}'", "deleted".green());
    }
    ProfileCommand::Export { path, names, tags } => {
      let exported = store
        .export_to_file(
          path,
          &ExportFilter {
            names: names.clone(),
            tags: tags.clone(),
          },
        )
        .await?;
      println!(
        "{} {exported} profiles to {}",
        "exported".green(),
        path.display()
      );
    }
    ProfileCommand::Import {
      path,
      prefix,
      overwrite,
      validate,
    } => {
      let report = store
        .import_from_file(
          path,
          &ImportOptions {
            name_prefix: prefix.clone(),
            overwrite: *overwrite,
            validate: *validate,
          },
        )
        .await?;
      println!(
        "{} {} profiles ({} skipped)",
        "imported".green(),
        report.imported.len(),
        report.skipped.len()
      );
      for skipped in &report.skipped {
        println!("  {} {skipped}", "skipped".yellow());
      }
    }
    ProfileCommand::Templates => {
      let mut table = Table::new();
      table.set_header(["Id", "Description", "Variables"]);
      for template in builtin_profile_templates() {
        table.add_row([
          template.id.to_string(),
          template.description.to_string(),
          template.required_variables.join(", "),
        ]);
      }
      println!("{table}");
    }
  }
  Ok(true)
}

fn parse_vars(
  raw: &[String],
) -> anyhow::Result<IndexMap<String, String>> {
  let mut vars = IndexMap::new();
  for pair in raw {
    let Some((name, value)) = pair.split_once('=') else {
      bail!("'{pair}' is not a name=value variable");
    };
    vars.insert(name.trim().to_string(), value.to_string());
  }
  Ok(vars)
}
