//! Capabilities the ingestor is built from.
//!
//! The ingestor has no knowledge of content formats or sink transports: it is
//! handed a [`Parser`] and a [`Sink`] at construction, plus a [`FileSource`]
//! that produces [`ReadyFile`]s (normally the [`DirectoryWatcher`]).
//!
//! [`DirectoryWatcher`]: crate::watcher::DirectoryWatcher

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{file::ReadyFile, watcher::WatchError};

/// A structured record produced by a [`Parser`]
pub trait Record: Send + Sync + 'static {
  /// Stamp the time the source file was received
  fn set_received_time(&mut self, received: DateTime<Utc>);
}

/// Errors a parser can report
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
  /// The file is valid but carries nothing worth indexing; it is deleted
  #[error("Ignorable file: {0}")]
  Ignorable(String),
  /// The content cannot be turned into a record; the file is quarantined
  #[error("Malformed content: {0}")]
  Malformed(String),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

/// Turns raw file content into a record.
///
/// Must not depend on ingestor state. Any error other than
/// [`ParseError::Ignorable`] is final: the file is quarantined and never
/// retried automatically.
pub trait Parser: Send + Sync + 'static {
  type Record: Record;

  fn parse(&self, file: &ReadyFile) -> Result<Self::Record, ParseError>;
}

/// Errors a sink can report. Every variant is treated as transient.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
  #[error("Sink rejected record: {0}")]
  Rejected(String),
  #[error("Sink unavailable: {0}")]
  Unavailable(String),
}

/// Downstream consumer of parsed records
#[async_trait]
pub trait Sink<R: Record>: Send + Sync + 'static {
  async fn index(&self, record: &R) -> Result<(), SinkError>;
}

/// Producer of ready files.
///
/// `watch` runs until cancelled or until it fails, pushing files into `files`.
/// Returning `Ok(())` means the source closed gracefully.
#[async_trait]
pub trait FileSource: Send + Sized + 'static {
  async fn watch(self, files: mpsc::Sender<ReadyFile>, cancel: CancellationToken) -> Result<(), WatchError>;
}
