//! ingestd - watch a directory tree and index every file dropped into it

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Instrument;

mod commands;
mod logging;

use commands::{RunOverrides, cmd_config, cmd_run, load_config};
use logging::{init_logging, service_span};

#[derive(Parser)]
#[command(name = "ingestd")]
#[command(about = "Watch a directory tree and index every file dropped into it")]
#[command(after_help = "\
QUICK START:
  ingestd run --root /data/inbox  # Watch and index until Ctrl-C
  ingestd config                  # Show the effective configuration

Config is read from --config, $INGESTD_CONFIG or ./ingestd.toml.")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Watch the root directory and index files until interrupted
  Run {
    /// Config file (default: $INGESTD_CONFIG, then ./ingestd.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Directory to watch, overriding watch.root
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,
    /// Emit files without reading their content
    #[arg(long)]
    skip_content: bool,
  },
  /// Print the effective configuration as TOML
  Config {
    /// Config file (default: $INGESTD_CONFIG, then ./ingestd.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Run {
      config,
      root,
      skip_content,
    } => {
      let config = load_config(config.as_deref(), RunOverrides { root, skip_content })?;
      let _guard = init_logging(&config.log);
      let span = service_span(&config.log);
      cmd_run(config).instrument(span).await
    }
    Commands::Config { config } => {
      let config = load_config(config.as_deref(), RunOverrides::default())?;
      cmd_config(&config)
    }
  }
}
