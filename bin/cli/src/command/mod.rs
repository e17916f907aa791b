use std::path::PathBuf;

use anyhow::Context;

use crate::config::cli_config;

pub mod epic;
pub mod profile;
pub mod state;
pub mod sync;

/// CLI flag wins, then TICKETRY_REPO.
pub fn resolve_repo(
  flag: &Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
  flag
    .clone()
    .or_else(|| cli_config().repo.clone())
    .context(
      "No repository given. Pass --repo or set TICKETRY_REPO",
    )
}
