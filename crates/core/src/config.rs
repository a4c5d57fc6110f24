//! Configuration system for ingestd.
//!
//! Config priority: explicit path > `$INGESTD_CONFIG` > `./ingestd.toml` > defaults.
//! Every section is `#[serde(default)]`, so a file only needs the keys it changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Quarantine directory for files that failed to parse, relative to the watch root
pub const UNPROCESSABLE_DIR: &str = "unprocessable";

/// Directory reserved for files redirected to another consumer, never watched
pub const REDIRECT_DIR: &str = "redirect";

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "INGESTD_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "ingestd.toml";

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Failed to render config: {0}")]
  Render(#[from] toml::ser::Error),
  #[error("watch.root must not be empty")]
  MissingRoot,
  #[error("ingest.{0} must be greater than zero")]
  Zero(&'static str),
}

// ============================================================================
// Watch Configuration
// ============================================================================

/// Directory watching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
  /// Root of the watched tree (required)
  pub root: PathBuf,

  /// Subdirectory names skipped at any depth, in addition to the quarantine
  /// and redirect directories
  pub ignored_dirs: Vec<String>,

  /// Regular expressions matched against file names; a match excludes the file
  pub ignored_patterns: Vec<String>,

  /// Emit files without reading their content (default: false)
  pub skip_content: bool,

  /// Quiet window a file must stay untouched before it is emitted (default: 250)
  pub debounce_ms: u64,

  /// Retries allowed per path before its events are dropped (default: 10)
  pub max_event_retries: u32,
}

impl Default for WatchConfig {
  fn default() -> Self {
    Self {
      root: PathBuf::new(),
      ignored_dirs: Vec::new(),
      ignored_patterns: Vec::new(),
      skip_content: false,
      debounce_ms: 250,
      max_event_retries: 10,
    }
  }
}

impl WatchConfig {
  /// Watch config rooted at `root` with everything else defaulted
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      ..Default::default()
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.root.as_os_str().is_empty() {
      return Err(ConfigError::MissingRoot);
    }
    Ok(())
  }

  /// The full set of ignored subdirectory names in canonical form.
  ///
  /// Always contains [`UNPROCESSABLE_DIR`] and [`REDIRECT_DIR`].
  pub fn ignored_dir_names(&self) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = self
      .ignored_dirs
      .iter()
      .map(|name| normalize_dir_name(name))
      .filter(|name| !name.is_empty())
      .collect();
    names.insert(UNPROCESSABLE_DIR.to_string());
    names.insert(REDIRECT_DIR.to_string());
    names
  }

  /// `<root>/unprocessable`
  pub fn quarantine_root(&self) -> PathBuf {
    self.root.join(UNPROCESSABLE_DIR)
  }
}

/// Strip whitespace and surrounding path separators from a directory name
fn normalize_dir_name(name: &str) -> String {
  name.trim().trim_matches(|c| c == '/' || c == '\\').to_string()
}

// ============================================================================
// Ingest Configuration
// ============================================================================

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
  /// Capacity of the ready-file queue between watcher and workers (default: 100)
  pub queue_capacity: usize,

  /// Files processed concurrently (default: 16)
  pub workers: usize,

  /// First delay before a file is requeued after a sink failure (default: 250)
  pub requeue_initial_backoff_ms: u64,

  /// Upper bound on the requeue delay (default: 30000)
  pub requeue_max_backoff_ms: u64,

  /// Growth factor applied to the delay on each failed attempt (default: 2.0)
  pub requeue_backoff_multiplier: f64,

  /// Index attempts before a file is moved to the quarantine directory.
  /// Unset means retry until the sink accepts it.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_index_attempts: Option<u32>,
}

impl Default for IngestConfig {
  fn default() -> Self {
    Self {
      queue_capacity: 100,
      workers: 16,
      requeue_initial_backoff_ms: 250,
      requeue_max_backoff_ms: 30_000,
      requeue_backoff_multiplier: 2.0,
      max_index_attempts: None,
    }
  }
}

impl IngestConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.queue_capacity == 0 {
      return Err(ConfigError::Zero("queue_capacity"));
    }
    if self.workers == 0 {
      return Err(ConfigError::Zero("workers"));
    }
    Ok(())
  }
}

// ============================================================================
// Indexer Configuration
// ============================================================================

/// Remote indexer service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
  /// Base URL of the indexer, including port if any
  pub host: String,

  /// API key appended to every request
  pub api_key: String,

  /// Path prefix of the indexer API (default: "/api/v1")
  pub path_prefix: String,

  /// Fail startup when the indexer does not answer a ping (default: true)
  pub ping_on_start: bool,

  /// Per-request timeout in seconds (default: 30)
  pub timeout_secs: u64,
}

impl Default for IndexerConfig {
  fn default() -> Self {
    Self {
      host: "http://localhost:8080".to_string(),
      api_key: String::new(),
      path_prefix: "/api/v1".to_string(),
      ping_on_start: true,
      timeout_secs: 30,
    }
  }
}

// ============================================================================
// Log Configuration
// ============================================================================

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  pub level: String,

  /// Directory for rolling log files. Console only when unset.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub directory: Option<PathBuf>,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  pub rotation: String,

  /// Service identifier attached to every log line
  pub service_id: String,

  /// Service name attached to every log line
  pub service_name: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
      rotation: "daily".to_string(),
      service_id: "ingestd".to_string(),
      service_name: "ingestd".to_string(),
    }
  }
}

// ============================================================================
// Metrics Configuration
// ============================================================================

/// Prometheus exporter configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
  /// Address serving `/metrics` in the Prometheus text format.
  /// Counters are still kept in-process when unset.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub listen: Option<SocketAddr>,
}

// ============================================================================
// Main Configuration
// ============================================================================

/// ingestd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Watched directory settings
  pub watch: WatchConfig,

  /// Queue and worker settings
  pub ingest: IngestConfig,

  /// Remote indexer settings
  pub indexer: IndexerConfig,

  /// Logging settings
  pub log: LogConfig,

  /// Metrics exporter settings
  pub metrics: MetricsConfig,
}

impl Config {
  /// Load config from an explicit file
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Locate a config file via `$INGESTD_CONFIG` or the working directory,
  /// falling back to defaults when neither exists
  pub fn discover() -> Result<Self, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_ENV)
      && !path.is_empty()
    {
      return Self::load(Path::new(&path));
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
      return Self::load(&local);
    }

    Ok(Self::default())
  }

  /// Check every section that has invariants
  pub fn validate(&self) -> Result<(), ConfigError> {
    self.watch.validate()?;
    self.ingest.validate()
  }

  /// Render the effective configuration
  pub fn to_toml(&self) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(self)?)
  }
}
