//! Directory enumeration for the watch set.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Error walking a directory tree
#[derive(Debug, thiserror::Error)]
#[error("Failed to walk {root}: {source}")]
pub struct IndexDirError {
  pub root: PathBuf,
  #[source]
  pub source: walkdir::Error,
}

impl IndexDirError {
  /// The walked path (or one of its children) vanished mid-walk
  pub fn is_not_found(&self) -> bool {
    self.source.io_error().is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
  }
}

/// Every directory under `root` that must be watched, in walk order.
///
/// `root` itself is always included. Any descendant directory whose base name
/// is in `ignored` is skipped together with its whole subtree. Symlinks are
/// not followed.
pub fn find_valid_directories(root: &Path, ignored: &BTreeSet<String>) -> Result<Vec<PathBuf>, IndexDirError> {
  let walker = WalkDir::new(root)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| {
      entry.depth() == 0
        || !entry.file_type().is_dir()
        || !ignored.contains(entry.file_name().to_string_lossy().as_ref())
    });

  let mut dirs = Vec::new();
  for entry in walker {
    let entry = entry.map_err(|source| IndexDirError {
      root: root.to_path_buf(),
      source,
    })?;
    if entry.file_type().is_dir() {
      dirs.push(entry.into_path());
    }
  }

  Ok(dirs)
}
