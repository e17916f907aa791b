use crate::args::Command;
use crate::config::{cli_args, cli_config};

#[macro_use]
extern crate tracing;

mod args;
mod command;
mod config;

async fn app() -> anyhow::Result<bool> {
  let config = cli_config();
  logger::init(&config.logging)?;
  debug!(
    "Ticketry version: v{}",
    env!("CARGO_PKG_VERSION")
  );

  match &cli_args().command {
    Command::Sync(sync_args) => {
      command::sync::run(sync_args).await
    }
    Command::Profile { command } => {
      command::profile::run(command).await
    }
    Command::State { command } => {
      command::state::run(command).await
    }
    Command::Epic { command } => {
      command::epic::run(command).await
    }
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  match app().await {
    Ok(true) => Ok(()),
    Ok(false) => std::process::exit(1),
    Err(e) => {
      use colored::Colorize;
      eprintln!("{}: {e:#}", "ERROR".red());
      std::process::exit(1)
    }
  }
}
