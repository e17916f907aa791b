use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use colored::Colorize;
use comfy_table::Table;
use git::GitRepository;
use profile::ProfileStore;
use query::QueryBuilder;
use rate_limit::{RateLimitConfig, RateLimiter};
use sync::{
  BatchResult, SyncEngine, SyncOptions, SyncPhase,
  progress_channel,
};
use ticketry_client::HttpTrackerClient;
use ticketry_client::entities::operation::SyncConfig;
use tokio_util::sync::CancellationToken;

use crate::args::SyncArgs;
use crate::command::resolve_repo;
use crate::config::cli_config;

enum Intent {
  Issues(Vec<String>),
  Jql(String),
}

pub async fn run(args: &SyncArgs) -> anyhow::Result<bool> {
  let config = cli_config();

  let (intent, repo_path, sync_config) =
    resolve_intent(args).await?;

  if config.base_url.is_empty() {
    bail!("TICKETRY_BASE_URL is not set");
  }

  let limiter = RateLimiter::new(RateLimitConfig {
    min_request_spacing: sync_config.rate_limit(),
    max_concurrent_requests: sync_config.concurrency,
    ..Default::default()
  });
  let client = Arc::new(
    HttpTrackerClient::new(
      &config.base_url,
      &config.email,
      &config.api_token,
    )
    .with_observer(limiter.clone()),
  );
  let repository = Arc::new(GitRepository::new(
    &config.commit_author,
    &config.commit_email,
  ));
  let engine = SyncEngine::new(client, repository, limiter);

  let ctx = CancellationToken::new();
  let cancel = ctx.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, finishing in-flight issues");
      cancel.cancel();
    }
  });

  let (progress_tx, mut progress_rx) = progress_channel();
  let printer = tokio::spawn(async move {
    while let Some(event) = progress_rx.recv().await {
      match event.phase {
        SyncPhase::Planning => {
          println!(
            "{} {} issues",
            "planning".dimmed(),
            event.total
          );
        }
        SyncPhase::Fetching => {
          let key = event.current_key.unwrap_or_default();
          println!(
            "  [{}/{}] {key}",
            event.processed, event.total
          );
        }
        SyncPhase::Finalizing | SyncPhase::Complete => {}
      }
    }
  });

  let opts = SyncOptions {
    config: sync_config.clone(),
    progress: Some(progress_tx),
  };
  let result = match &intent {
    Intent::Issues(keys) if sync_config.incremental => {
      engine
        .sync_issues_incremental(
          &ctx,
          keys.clone(),
          &repo_path,
          opts,
        )
        .await
    }
    Intent::Issues(keys) => {
      engine
        .sync_issues(&ctx, keys.clone(), &repo_path, opts)
        .await
    }
    Intent::Jql(jql) if sync_config.incremental => {
      engine
        .sync_jql_incremental(&ctx, jql, &repo_path, opts)
        .await
    }
    Intent::Jql(jql) => {
      engine.sync_jql(&ctx, jql, &repo_path, opts).await
    }
  }
  .context("sync failed before any issue was processed")?;
  printer.await.ok();

  if let Some(name) = &args.profile {
    ProfileStore::new(&config.profile_dir)
      .record_usage(
        name,
        result.operation.duration_ms,
        result.is_success(),
      )
      .await
      .ok();
  }

  print_summary(&result);
  Ok(result.is_success())
}

async fn resolve_intent(
  args: &SyncArgs,
) -> anyhow::Result<(Intent, PathBuf, SyncConfig)> {
  let config = cli_config();
  let intents = [
    !args.issues.is_empty(),
    args.jql.is_some(),
    args.epic.is_some(),
    args.profile.is_some(),
  ]
  .into_iter()
  .filter(|set| *set)
  .count();
  if intents != 1 {
    bail!(
      "Pass exactly one of --issues, --jql, --epic, --profile"
    );
  }

  let mut sync_config = config.sync.clone();
  let mut repo_flag = args.repo.clone();
  let intent = if let Some(name) = &args.profile {
    let profile = ProfileStore::new(&config.profile_dir)
      .get(name)
      .await
      .with_context(|| format!("profile '{name}'"))?;
    sync_config = profile.options.clone();
    repo_flag = repo_flag.or(Some(profile.repository.clone()));
    match (&profile.epic_key, &profile.jql) {
      (Some(epic), _) => Intent::Jql(
        QueryBuilder::new().build_epic_query(epic)?,
      ),
      (None, Some(jql)) => Intent::Jql(jql.clone()),
      (None, None) => bail!(
        "profile '{name}' carries neither an epic nor a query"
      ),
    }
  } else if let Some(epic) = &args.epic {
    Intent::Jql(QueryBuilder::new().build_epic_query(epic)?)
  } else if let Some(jql) = &args.jql {
    Intent::Jql(jql.clone())
  } else {
    Intent::Issues(args.issues.clone())
  };

  // Flags override whatever the profile or env provided.
  if let Some(concurrency) = args.concurrency {
    sync_config.concurrency = concurrency;
  }
  if let Some(rate_limit) = args.rate_limit {
    sync_config.rate_limit_ms = rate_limit.as_millis() as u64;
  }
  sync_config.force |= args.force;
  sync_config.dry_run |= args.dry_run;
  sync_config.incremental |= args.incremental;

  let repo_path = resolve_repo(&repo_flag)?;
  Ok((intent, repo_path, sync_config))
}

fn print_summary(result: &BatchResult) {
  let results = &result.operation.results;
  let mut table = Table::new();
  table.add_row([
    "Status".to_string(),
    result.status().to_string(),
  ]);
  table.add_row(["Total".to_string(), results.total.to_string()]);
  table.add_row([
    "Successful".to_string(),
    results.successful.to_string(),
  ]);
  table.add_row([
    "Skipped".to_string(),
    results.skipped.to_string(),
  ]);
  table.add_row([
    "Failed".to_string(),
    results.failed.to_string(),
  ]);
  table.add_row([
    "Duration".to_string(),
    format!("{}ms", result.operation.duration_ms),
  ]);
  table.add_row([
    "Throughput".to_string(),
    format!("{:.1} issues/s", result.throughput_issues_per_sec),
  ]);
  if result.dry_run {
    table.add_row(["Mode", "dry run"]);
  }
  println!("{table}");

  for error in &results.errors {
    println!(
      "{} {}: {} ({})",
      "failed".red(),
      error.issue_key,
      error.message,
      error.kind
    );
  }
  for link_error in &result.link_errors {
    println!("{} {link_error}", "link".yellow());
  }
}
