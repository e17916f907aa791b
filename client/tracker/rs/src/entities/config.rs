use std::path::PathBuf;

use serde::Deserialize;

use super::logger::{LogLevel, StdioLogMode};
use super::operation::SyncConfig;

/// Raw environment, parsed with `envy`. All fields optional;
/// resolution into [CliConfig] applies defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Env {
  /// Base URL of the remote tracker, eg `https://acme.atlassian.net`.
  pub ticketry_base_url: Option<String>,
  /// Account email for basic auth.
  pub ticketry_email: Option<String>,
  /// API token for basic auth.
  pub ticketry_api_token: Option<String>,
  /// Default target repository.
  pub ticketry_repo: Option<PathBuf>,
  pub ticketry_profile_dir: Option<PathBuf>,
  pub ticketry_query_dir: Option<PathBuf>,
  pub ticketry_concurrency: Option<usize>,
  pub ticketry_rate_limit_ms: Option<u64>,
  /// Author identity stamped on commits.
  pub ticketry_commit_author: Option<String>,
  pub ticketry_commit_email: Option<String>,
  pub ticketry_log_level: Option<LogLevel>,
  pub ticketry_log_stdio: Option<StdioLogMode>,
  pub ticketry_log_pretty: Option<bool>,
  pub ticketry_log_ansi: Option<bool>,
}

/// Resolved CLI configuration: environment with defaults applied.
/// CLI flags override individual fields after resolution.
#[derive(Debug, Clone)]
pub struct CliConfig {
  pub base_url: String,
  pub email: String,
  pub api_token: String,
  pub repo: Option<PathBuf>,
  pub profile_dir: PathBuf,
  pub query_dir: PathBuf,
  pub sync: SyncConfig,
  pub commit_author: String,
  pub commit_email: String,
  pub logging: super::logger::LogConfig,
}

impl From<Env> for CliConfig {
  fn from(env: Env) -> Self {
    let home = dirs_fallback();
    Self {
      base_url: env.ticketry_base_url.unwrap_or_default(),
      email: env.ticketry_email.unwrap_or_default(),
      api_token: env.ticketry_api_token.unwrap_or_default(),
      repo: env.ticketry_repo,
      profile_dir: env
        .ticketry_profile_dir
        .unwrap_or_else(|| home.join(".ticketry/profiles")),
      query_dir: env
        .ticketry_query_dir
        .unwrap_or_else(|| home.join(".ticketry/queries")),
      sync: SyncConfig {
        concurrency: env
          .ticketry_concurrency
          .unwrap_or(SyncConfig::default().concurrency),
        rate_limit_ms: env
          .ticketry_rate_limit_ms
          .unwrap_or(SyncConfig::default().rate_limit_ms),
        ..Default::default()
      },
      commit_author: env
        .ticketry_commit_author
        .unwrap_or_else(|| String::from("Ticketry Sync")),
      commit_email: env
        .ticketry_commit_email
        .unwrap_or_else(|| String::from("sync@ticketry.dev")),
      logging: super::logger::LogConfig {
        level: env.ticketry_log_level.unwrap_or_default(),
        stdio: env.ticketry_log_stdio.unwrap_or_default(),
        pretty: env.ticketry_log_pretty.unwrap_or_default(),
        ansi: env.ticketry_log_ansi.unwrap_or(true),
        location: false,
      },
    }
  }
}

fn dirs_fallback() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
}
