use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ticketry_client::entities::logger::LogLevel;

#[derive(Debug, Clone, Parser)]
#[command(
  name = "tk",
  about = "Mirror tracker issues into a git repository",
  version
)]
pub struct CliArgs {
  #[command(subcommand)]
  pub command: Command,

  /// Override the configured log level.
  #[arg(long, global = true)]
  pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
  /// Sync issues into the repository.
  Sync(SyncArgs),
  /// Manage reusable sync profiles.
  Profile {
    #[command(subcommand)]
    command: ProfileCommand,
  },
  /// Inspect and repair the sync state document.
  State {
    #[command(subcommand)]
    command: StateCommand,
  },
  /// Analyze an epic without syncing anything.
  Epic {
    #[command(subcommand)]
    command: EpicCommand,
  },
}

#[derive(Debug, Clone, Subcommand)]
pub enum EpicCommand {
  /// Discover an epic's issues and report the breakdown.
  Analyze {
    key: String,
    /// Discovery strategy: epic_link, custom_field,
    /// parent_link, linked_issues, hybrid.
    #[arg(long, default_value = "hybrid")]
    strategy: String,
  },
  /// Print the epic's issue tree.
  Hierarchy {
    key: String,
    /// 0 shows direct children only.
    #[arg(long, default_value_t = 5)]
    depth: i32,
  },
}

#[derive(Debug, Clone, clap::Args)]
pub struct SyncArgs {
  /// Explicit issue keys, comma separated.
  #[arg(long, value_delimiter = ',')]
  pub issues: Vec<String>,

  /// Raw query in the remote dialect.
  #[arg(long)]
  pub jql: Option<String>,

  /// Sync everything belonging to this epic.
  #[arg(long)]
  pub epic: Option<String>,

  /// Use a stored profile as the intent.
  #[arg(long)]
  pub profile: Option<String>,

  /// Target repository. Defaults to TICKETRY_REPO.
  #[arg(long)]
  pub repo: Option<PathBuf>,

  /// Plan and fetch, but never write to the repository.
  #[arg(long, default_value_t = false)]
  pub dry_run: bool,

  /// Re-sync issues even when unchanged.
  #[arg(long, default_value_t = false)]
  pub force: bool,

  /// Plan against the state document, skipping what is current.
  #[arg(long, default_value_t = false)]
  pub incremental: bool,

  /// Worker count for the fetch pool.
  #[arg(long)]
  pub concurrency: Option<usize>,

  /// Minimum spacing between remote requests, eg `250ms`, `2s`.
  #[arg(long, value_parser = parse_duration)]
  pub rate_limit: Option<Duration>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ProfileCommand {
  /// Create a profile, directly or from a template.
  Create {
    name: String,
    /// Template id; see `tk profile templates`.
    #[arg(long)]
    template: Option<String>,
    /// Epic key for a direct epic profile.
    #[arg(long)]
    epic: Option<String>,
    /// Raw query for a direct query profile.
    #[arg(long)]
    jql: Option<String>,
    /// Target repository recorded on the profile.
    #[arg(long)]
    repo: Option<PathBuf>,
    /// Template variables as `name=value`, comma separated.
    #[arg(long, value_delimiter = ',')]
    var: Vec<String>,
  },
  /// List stored profiles.
  List,
  /// Show one profile in full.
  Show { name: String },
  /// Delete a profile.
  Delete { name: String },
  /// Export profiles to a file.
  Export {
    path: PathBuf,
    /// Only these profile names.
    #[arg(long, value_delimiter = ',')]
    names: Vec<String>,
    /// Only profiles carrying one of these tags.
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
  },
  /// Import profiles from a file.
  Import {
    path: PathBuf,
    /// Prefix for every imported profile name.
    #[arg(long, default_value = "")]
    prefix: String,
    #[arg(long, default_value_t = false)]
    overwrite: bool,
    #[arg(long, default_value_t = true)]
    validate: bool,
  },
  /// List the built-in profile templates.
  Templates,
}

#[derive(Debug, Clone, Subcommand)]
pub enum StateCommand {
  /// Cross-check the state document against the repository.
  Validate {
    #[arg(long)]
    repo: Option<PathBuf>,
  },
  /// Apply recovery actions to a diverged state document.
  Recover {
    #[arg(long)]
    repo: Option<PathBuf>,
    /// Actions: full_resync, remove_orphans, repair_state,
    /// skip_corrupted, validate_only.
    #[arg(long, value_delimiter = ',', required = true)]
    actions: Vec<String>,
    #[arg(long, default_value_t = true)]
    backup_first: bool,
    #[arg(long, default_value_t = false)]
    dry_run: bool,
  },
  /// Copy the state document to its backup sibling.
  Backup {
    #[arg(long)]
    repo: Option<PathBuf>,
  },
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
  let raw = raw.trim();
  if let Some(ms) = raw.strip_suffix("ms") {
    return ms
      .trim()
      .parse()
      .map(Duration::from_millis)
      .map_err(|_| format!("'{raw}' is not a duration"));
  }
  if let Some(secs) = raw.strip_suffix('s') {
    return secs
      .trim()
      .parse()
      .map(Duration::from_secs)
      .map_err(|_| format!("'{raw}' is not a duration"));
  }
  raw
    .parse()
    .map(Duration::from_millis)
    .map_err(|_| {
      format!("'{raw}' is not a duration (try `250ms` or `2s`)")
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn durations_parse() {
    assert_eq!(
      parse_duration("250ms").unwrap(),
      Duration::from_millis(250)
    );
    assert_eq!(
      parse_duration("2s").unwrap(),
      Duration::from_secs(2)
    );
    assert_eq!(
      parse_duration("500").unwrap(),
      Duration::from_millis(500)
    );
    assert!(parse_duration("soon").is_err());
  }

  #[test]
  fn sync_flags_parse() {
    let args = CliArgs::parse_from([
      "tk",
      "sync",
      "--issues=K1-1,K1-2",
      "--repo=/tmp/repo",
      "--force",
      "--concurrency=8",
      "--rate-limit=100ms",
    ]);
    let Command::Sync(sync) = args.command else {
      panic!("expected sync");
    };
    assert_eq!(sync.issues, vec!["K1-1", "K1-2"]);
    assert!(sync.force);
    assert_eq!(sync.concurrency, Some(8));
    assert_eq!(
      sync.rate_limit,
      Some(Duration::from_millis(100))
    );
  }
}
