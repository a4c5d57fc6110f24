//! The unit of work handed from the watcher to the ingestor.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// A file the watcher has determined is fully written and eligible for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyFile {
  /// Base name of the file
  pub name: String,
  /// Absolute path
  pub path: PathBuf,
  /// Path relative to the watch root
  pub relative: PathBuf,
  /// File content at settle time (empty when content reading is skipped)
  pub bytes: Vec<u8>,
  /// On-disk mtime for files found by a scan, wall-clock settle time otherwise
  pub received_time: DateTime<Utc>,
  /// Failed index attempts so far (zero when first emitted)
  pub attempts: u32,
}

impl ReadyFile {
  /// Build a ready file for `path` under `root`.
  ///
  /// Returns `None` when `path` is not inside `root` or has no file name.
  pub fn new(root: &Path, path: PathBuf, bytes: Vec<u8>, received_time: DateTime<Utc>) -> Option<Self> {
    let relative = path.strip_prefix(root).ok()?.to_path_buf();
    let name = path.file_name()?.to_string_lossy().into_owned();
    Some(Self {
      name,
      path,
      relative,
      bytes,
      received_time,
      attempts: 0,
    })
  }
}
