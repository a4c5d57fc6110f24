mod config;
mod run;

pub use config::{RunOverrides, cmd_config, load_config};
pub use run::cmd_run;
