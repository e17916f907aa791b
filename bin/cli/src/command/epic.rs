use std::sync::Arc;

use anyhow::bail;
use colored::Colorize;
use comfy_table::Table;
use epic::{AnalyzerOptions, DiscoveryStrategy, EpicAnalyzer};
use ticketry_client::HttpTrackerClient;
use ticketry_client::entities::analysis::HierarchyNode;

use crate::args::EpicCommand;
use crate::config::cli_config;

pub async fn run(command: &EpicCommand) -> anyhow::Result<bool> {
  let config = cli_config();
  if config.base_url.is_empty() {
    bail!("TICKETRY_BASE_URL is not set");
  }
  let client = Arc::new(HttpTrackerClient::new(
    &config.base_url,
    &config.email,
    &config.api_token,
  ));
  let analyzer = EpicAnalyzer::new(client);

  match command {
    EpicCommand::Analyze { key, strategy } => {
      let result = analyzer
        .analyze_epic(
          key,
          &AnalyzerOptions {
            strategy: parse_strategy(strategy)?,
            ..Default::default()
          },
        )
        .await?;
      println!(
        "{} {key}: {} issues",
        "epic".bold(),
        result.total_issues
      );
      let mut table = Table::new();
      table.set_header(["Type", "Count", "Keys"]);
      for (issue_type, keys) in &result.issues_by_type {
        table.add_row([
          issue_type.clone(),
          keys.len().to_string(),
          keys.join(", "),
        ]);
      }
      println!("{table}");
      for unresolved in &result.completeness.unresolved {
        println!(
          "{} {} -> {} ({})",
          "broken".red(),
          unresolved.source,
          unresolved.target,
          unresolved.kind
        );
      }
      for recommendation in
        &result.completeness.recommendations
      {
        println!("{} {recommendation}", "hint".yellow());
      }
    }
    EpicCommand::Hierarchy { key, depth } => {
      let nodes = analyzer
        .get_epic_hierarchy(
          key,
          &AnalyzerOptions {
            max_depth: *depth,
            ..Default::default()
          },
        )
        .await?;
      println!("{}", key.bold());
      for node in &nodes {
        print_node(node);
      }
    }
  }
  Ok(true)
}

fn print_node(node: &HierarchyNode) {
  println!(
    "{}- {} [{}] {}",
    "  ".repeat(node.level + 1),
    node.issue_key,
    node.issue_type,
    node.summary.dimmed()
  );
  for subtask in &node.subtasks {
    print_node(subtask);
  }
}

fn parse_strategy(
  raw: &str,
) -> anyhow::Result<DiscoveryStrategy> {
  Ok(match raw {
    "epic_link" => DiscoveryStrategy::EpicLink,
    "custom_field" => DiscoveryStrategy::CustomField,
    "parent_link" => DiscoveryStrategy::ParentLink,
    "linked_issues" => DiscoveryStrategy::LinkedIssues,
    "hybrid" => DiscoveryStrategy::Hybrid,
    _ => bail!(
      "'{raw}' is not a discovery strategy (epic_link, custom_field, parent_link, linked_issues, hybrid)"
    ),
  })
}
