//! Config loading and the `config` command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ingest_core::Config;

/// Command line values that take precedence over the config file
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
  pub root: Option<PathBuf>,
  pub skip_content: bool,
}

impl RunOverrides {
  fn apply(self, config: &mut Config) {
    if let Some(root) = self.root {
      config.watch.root = root;
    }
    if self.skip_content {
      config.watch.skip_content = true;
    }
  }
}

/// Load the explicit config file, or discover one
pub fn load_config(path: Option<&Path>, overrides: RunOverrides) -> Result<Config> {
  let mut config = match path {
    Some(path) => Config::load(path)?,
    None => Config::discover()?,
  };
  overrides.apply(&mut config);
  Ok(config)
}

/// Print the effective configuration
pub fn cmd_config(config: &Config) -> Result<()> {
  let rendered = config.to_toml().context("Failed to render config")?;
  print!("{}", rendered);
  Ok(())
}
