//! Shared configuration for the ingestd workspace.

pub mod config;

pub use config::{
  Config, ConfigError, IndexerConfig, IngestConfig, LogConfig, MetricsConfig, REDIRECT_DIR, UNPROCESSABLE_DIR, WatchConfig,
};
