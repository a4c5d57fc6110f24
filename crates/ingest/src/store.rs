//! Filesystem side effects of processing: deletion and quarantine.
//!
//! Both operations are best-effort local filesystem calls, not transactions.

use std::path::{Path, PathBuf};

use ingest_core::UNPROCESSABLE_DIR;
use tracing::trace;

use crate::file::ReadyFile;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Failed to delete {path}: {source}")]
  Delete {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to create {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to move {from} to {to}: {source}")]
  Move {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Deletes processed files and moves unprocessable ones aside
#[derive(Debug, Clone)]
pub struct FileStore {
  quarantine_root: PathBuf,
}

impl FileStore {
  /// Store for the tree rooted at `root`; quarantine goes to `<root>/unprocessable`
  pub fn new(root: &Path) -> Self {
    Self {
      quarantine_root: root.join(UNPROCESSABLE_DIR),
    }
  }

  pub fn quarantine_root(&self) -> &Path {
    &self.quarantine_root
  }

  /// Where `file` lands when quarantined: its relative path mirrored under the
  /// quarantine root
  pub fn quarantine_path(&self, file: &ReadyFile) -> PathBuf {
    self.quarantine_root.join(&file.relative)
  }

  pub async fn delete(&self, file: &ReadyFile) -> Result<(), StoreError> {
    tokio::fs::remove_file(&file.path)
      .await
      .map_err(|source| StoreError::Delete {
        path: file.path.clone(),
        source,
      })
  }

  /// Move `file` under the quarantine root, creating missing directories.
  ///
  /// Returns the new location.
  pub async fn quarantine(&self, file: &ReadyFile) -> Result<PathBuf, StoreError> {
    let target = self.quarantine_path(file);

    if let Some(parent) = target.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| StoreError::CreateDir {
          path: parent.to_path_buf(),
          source,
        })?;
    }

    trace!(from = %file.path.display(), to = %target.display(), "Moving file to quarantine");
    tokio::fs::rename(&file.path, &target)
      .await
      .map_err(|source| StoreError::Move {
        from: file.path.clone(),
        to: target.clone(),
        source,
      })?;

    Ok(target)
  }
}
