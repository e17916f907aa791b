use anyhow::{Context, bail};
use colored::Colorize;
use comfy_table::Table;
use state::{RecoverOptions, RecoveryAction, StateStore};

use crate::args::StateCommand;
use crate::command::resolve_repo;

pub async fn run(
  command: &StateCommand,
) -> anyhow::Result<bool> {
  let store = StateStore::new();
  match command {
    StateCommand::Validate { repo } => {
      let repo_path = resolve_repo(repo)?;
      let state = store
        .load_state(&repo_path)
        .await?
        .context("this repository has never been synced")?;
      let report =
        store.validate_state(&state, &repo_path).await?;
      if report.is_clean() {
        println!(
          "{}: state matches the repository",
          "clean".green()
        );
        return Ok(true);
      }
      let mut table = Table::new();
      table.set_header(["Problem", "Entry"]);
      for key in &report.missing_issues {
        table.add_row(["missing file", key.as_str()]);
      }
      for path in &report.orphaned_files {
        table.add_row([
          "orphaned file".to_string(),
          path.display().to_string(),
        ]);
      }
      for key in &report.checksum_warnings {
        table.add_row(["modified outside sync", key.as_str()]);
      }
      println!("{table}");
      println!(
        "run {} to repair",
        "tk state recover --actions=repair_state,remove_orphans"
          .bold()
      );
      Ok(false)
    }
    StateCommand::Recover {
      repo,
      actions,
      backup_first,
      dry_run,
    } => {
      let repo_path = resolve_repo(repo)?;
      let mut state = store
        .load_state(&repo_path)
        .await?
        .context("this repository has never been synced")?;
      let actions = actions
        .iter()
        .map(|action| parse_action(action))
        .collect::<anyhow::Result<Vec<_>>>()?;
      let report = store
        .recover_state(
          &mut state,
          &repo_path,
          &RecoverOptions {
            actions,
            backup_first: *backup_first,
            dry_run: *dry_run,
          },
        )
        .await?;
      if report.dry_run {
        println!("{} (no changes written)", "dry run".yellow());
      }
      println!(
        "removed {} orphaned files, dropped {} states, repaired {}, reset {}",
        report.removed_files.len(),
        report.removed_states.len(),
        report.repaired.len(),
        report.reset_for_resync
      );
      Ok(true)
    }
    StateCommand::Backup { repo } => {
      let repo_path = resolve_repo(repo)?;
      store.backup_state(&repo_path).await?;
      println!(
        "{} state backed up",
        "ok".green()
      );
      Ok(true)
    }
  }
}

fn parse_action(raw: &str) -> anyhow::Result<RecoveryAction> {
  Ok(match raw {
    "full_resync" => RecoveryAction::FullResync,
    "remove_orphans" => RecoveryAction::RemoveOrphans,
    "repair_state" => RecoveryAction::RepairState,
    "skip_corrupted" => RecoveryAction::SkipCorrupted,
    "validate_only" => RecoveryAction::ValidateOnly,
    _ => bail!(
      "'{raw}' is not a recovery action (full_resync, remove_orphans, repair_state, skip_corrupted, validate_only)"
    ),
  })
}
