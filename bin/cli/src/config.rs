use std::sync::OnceLock;

use clap::Parser;
use ticketry_client::entities::config::{CliConfig, Env};

use crate::args::CliArgs;

pub fn cli_args() -> &'static CliArgs {
  static CLI_ARGS: OnceLock<CliArgs> = OnceLock::new();
  CLI_ARGS.get_or_init(CliArgs::parse)
}

pub fn cli_config() -> &'static CliConfig {
  static CLI_CONFIG: OnceLock<CliConfig> = OnceLock::new();
  CLI_CONFIG.get_or_init(|| {
    let env: Env = envy::from_env()
      .expect("failed to parse ticketry environment");
    let mut config = CliConfig::from(env);
    if let Some(level) = cli_args().log_level {
      config.logging.level = level;
    }
    config
  })
}
