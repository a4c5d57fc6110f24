//! DirectoryWatcher - recursive watch over the ingestion tree
//!
//! Runs in two phases:
//! 1. **Initial scan**: every valid directory is listed and each accepted file
//!    is emitted with its on-disk modification time. Any error aborts the watch.
//! 2. **Live watch**: every directory found by the scan is subscribed
//!    non-recursively. New subdirectories extend the watch set as they appear,
//!    and file events are debounced until the file settles.
//!
//! # Design
//!
//! notify's sync callback forwards raw events over a bounded channel with
//! `blocking_send`. A single coordinator loop owns all watch state (the
//! [`DebounceRegistry`], the watched set and the retry counters), so nothing is
//! shared and nothing is locked. The loop sleeps until the earliest debounce
//! deadline, the next event, or cancellation, whichever comes first.
//!
//! A rename counts as a removal of the old name and a new file under the new
//! name, so files moved into the tree (or written under a temporary name and
//! renamed into place) are picked up like any other new file. A write-finished
//! notification re-arms the quiet window like any other write, so a writer that
//! reopens the file per chunk still yields a single emission.

use std::{
  collections::{BTreeSet, HashSet},
  io,
  path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingest_core::{ConfigError, WatchConfig};
use notify::{
  Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
  event::{AccessKind, AccessMode, ModifyKind, RenameMode},
};
use tokio::{
  sync::{mpsc, watch},
  time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
  contract::FileSource,
  debounce::DebounceRegistry,
  dirs::{IndexDirError, find_valid_directories},
  file::ReadyFile,
  filter::{FilterError, PathFilter},
};

/// Buffer between notify's callback thread and the coordinator loop
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that end a watch
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("Watch root {path} is unavailable: {source}")]
  Root {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Filter(#[from] FilterError),

  #[error(transparent)]
  IndexDir(#[from] IndexDirError),

  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch {path}: {source}")]
  Subscribe {
    path: PathBuf,
    #[source]
    source: notify::Error,
  },

  #[error("Watcher error: {0}")]
  Notify(#[source] notify::Error),

  #[error("Failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("Directory walk task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  #[error("Ready-file queue closed")]
  QueueClosed,

  /// Cancellation interrupted a blocking step; `watch` reports it as a clean stop
  #[error("Watch cancelled")]
  Cancelled,
}

// ============================================================================
// Phase
// ============================================================================

/// Lifecycle of a [`DirectoryWatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
  NotStarted,
  InitialScanning,
  LiveWatching,
  Stopped,
  Failed,
}

/// What a raw notification means for the paths it names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
  /// Created, written, closed after writing, or renamed into place; (re)arm
  /// the quiet window
  Touch,
  /// The path is gone, or was renamed away
  Removed,
  /// A rename carrying both names: `[from, to]`
  Moved,
}

impl Change {
  fn classify(kind: &EventKind) -> Option<Self> {
    match kind {
      EventKind::Create(_) => Some(Self::Touch),
      EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Self::Removed),
      EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Some(Self::Moved),
      // `To`, plus backends that cannot tell the two sides apart
      EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Touch),
      EventKind::Modify(ModifyKind::Metadata(_)) => None,
      EventKind::Modify(_) => Some(Self::Touch),
      EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(Self::Touch),
      EventKind::Remove(_) => Some(Self::Removed),
      EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
  }

  /// Pair each path of an event with what happened to it.
  ///
  /// The old name of a move is handled before the new one.
  fn split(self, paths: Vec<PathBuf>) -> Vec<(Self, PathBuf)> {
    if self != Self::Moved {
      return paths.into_iter().map(|path| (self, path)).collect();
    }

    let mut paths = paths.into_iter();
    match (paths.next(), paths.next()) {
      (Some(from), Some(to)) => vec![(Self::Removed, from), (Self::Touch, to)],
      (Some(to), None) => vec![(Self::Touch, to)],
      _ => Vec::new(),
    }
  }
}

// ============================================================================
// DirectoryWatcher
// ============================================================================

/// Recursive watcher that emits a [`ReadyFile`] per settled file
pub struct DirectoryWatcher {
  root: PathBuf,
  ignored_dirs: BTreeSet<String>,
  filter: PathFilter,
  skip_content: bool,
  registry: DebounceRegistry,
  watched: HashSet<PathBuf>,
  // The notify watcher must be held to keep the subscriptions alive
  watcher: RecommendedWatcher,
  event_rx: mpsc::Receiver<notify::Result<Event>>,
  phase: watch::Sender<WatchPhase>,
}

impl DirectoryWatcher {
  /// Validate `config` and prepare a watcher.
  ///
  /// The root is canonicalized here; no directory is subscribed until
  /// [`FileSource::watch`] runs.
  pub fn new(config: &WatchConfig) -> Result<Self, WatchError> {
    config.validate()?;

    let root = std::fs::canonicalize(&config.root).map_err(|source| WatchError::Root {
      path: config.root.clone(),
      source,
    })?;
    let filter = PathFilter::new(&config.ignored_patterns)?;

    let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>(EVENT_CHANNEL_CAPACITY);
    let watcher = RecommendedWatcher::new(
      move |res| {
        // Runs on notify's thread; a closed channel means the watcher is gone
        let _ = event_tx.blocking_send(res);
      },
      notify::Config::default(),
    )
    .map_err(WatchError::Init)?;

    let (phase, _) = watch::channel(WatchPhase::NotStarted);

    info!(root = %root.display(), "Directory watcher initialized");

    Ok(Self {
      root,
      ignored_dirs: config.ignored_dir_names(),
      filter,
      skip_content: config.skip_content,
      registry: DebounceRegistry::new(
        std::time::Duration::from_millis(config.debounce_ms),
        config.max_event_retries,
      ),
      watched: HashSet::new(),
      watcher,
      event_rx,
      phase,
    })
  }

  /// Canonical watch root
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Receiver that tracks phase transitions, including after the watch ends
  pub fn subscribe_phase(&self) -> watch::Receiver<WatchPhase> {
    self.phase.subscribe()
  }

  fn set_phase(&self, phase: WatchPhase) {
    debug!(?phase, "Watch phase changed");
    self.phase.send_replace(phase);
  }

  async fn run(&mut self, files: &mpsc::Sender<ReadyFile>, cancel: &CancellationToken) -> Result<(), WatchError> {
    self.set_phase(WatchPhase::InitialScanning);
    let dirs = self.index_directories(self.root.clone()).await?;
    self.initial_scan(&dirs, files, cancel).await?;

    for dir in dirs {
      self.subscribe(dir)?;
    }
    self.set_phase(WatchPhase::LiveWatching);
    info!(root = %self.root.display(), directories = self.watched.len(), "Watching for new files");

    loop {
      let deadline = self.registry.next_deadline();

      tokio::select! {
        biased;

        _ = cancel.cancelled() => return Err(WatchError::Cancelled),

        event = self.event_rx.recv() => match event {
          Some(Ok(event)) => self.handle_event(event).await?,
          Some(Err(e)) => return Err(WatchError::Notify(e)),
          None => {
            info!("Notification channel closed");
            return Ok(());
          }
        },

        _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
          for path in self.registry.take_settled(Instant::now()) {
            self.settle(path, files, cancel).await?;
          }
        }
      }
    }
  }

  // ==========================================================================
  // Initial Scan
  // ==========================================================================

  async fn index_directories(&self, dir: PathBuf) -> Result<Vec<PathBuf>, WatchError> {
    let ignored = self.ignored_dirs.clone();
    let dirs = tokio::task::spawn_blocking(move || find_valid_directories(&dir, &ignored)).await??;
    Ok(dirs)
  }

  async fn initial_scan(
    &self,
    dirs: &[PathBuf],
    files: &mpsc::Sender<ReadyFile>,
    cancel: &CancellationToken,
  ) -> Result<(), WatchError> {
    let mut found = 0usize;

    for dir in dirs {
      for path in list_files(dir).await.map_err(|source| WatchError::Io {
        path: dir.clone(),
        source,
      })? {
        if !self.accepts(&path) {
          trace!(path = %path.display(), "Skipping ignored file");
          continue;
        }

        let io_err = |source| WatchError::Io {
          path: path.clone(),
          source,
        };
        let metadata = tokio::fs::metadata(&path).await.map_err(io_err)?;
        let received_time: DateTime<Utc> = metadata.modified().map_err(io_err)?.into();
        let bytes = if self.skip_content {
          Vec::new()
        } else {
          tokio::fs::read(&path).await.map_err(io_err)?
        };

        let Some(file) = ReadyFile::new(&self.root, path.clone(), bytes, received_time) else {
          continue;
        };
        info!(path = %file.path.display(), "Existing file found");
        emit(files, cancel, file).await?;
        found += 1;
      }
    }

    info!(files = found, directories = dirs.len(), "Initial scan complete");
    Ok(())
  }

  // ==========================================================================
  // Live Watch
  // ==========================================================================

  async fn handle_event(&mut self, event: Event) -> Result<(), WatchError> {
    let Some(change) = Change::classify(&event.kind) else {
      trace!(kind = ?event.kind, paths = ?event.paths, "Event ignored");
      return Ok(());
    };

    for (change, path) in change.split(event.paths) {
      if change == Change::Removed {
        self.release(&path);
        continue;
      }

      if self.registry.retries_exhausted(&path) {
        error!(path = %path.display(), "Event dropped, path exceeded its retry limit");
        continue;
      }
      self.touch(path).await?;
    }

    Ok(())
  }

  async fn touch(&mut self, path: PathBuf) -> Result<(), WatchError> {
    let metadata = match tokio::fs::metadata(&path).await {
      Ok(metadata) => metadata,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        error!(path = %path.display(), "Event dropped, path no longer exists");
        self.release(&path);
        return Ok(());
      }
      Err(e) => {
        self.retry(&path, &e);
        return Ok(());
      }
    };

    if metadata.is_dir() {
      if !self.watched.contains(&path) {
        self.add_directory(path).await?;
      }
      return Ok(());
    }

    if !self.accepts(&path) {
      trace!(path = %path.display(), "Skipping ignored file");
      return Ok(());
    }

    if self.registry.touch(&path, Instant::now()) {
      debug!(path = %path.display(), "New file detected");
    } else {
      trace!(path = %path.display(), "File still being written");
    }
    Ok(())
  }

  /// Extend the watch set to a directory created after the watch started.
  ///
  /// Files already inside the new subtree go through the debounce like any
  /// other live file, so they are emitted once whether the scan or a
  /// notification saw them first.
  async fn add_directory(&mut self, dir: PathBuf) -> Result<(), WatchError> {
    if dir.file_name().is_some_and(|name| self.ignored_dirs.contains(name.to_string_lossy().as_ref())) {
      debug!(path = %dir.display(), "Ignoring new directory");
      return Ok(());
    }

    info!(path = %dir.display(), "New directory detected");

    let dirs = match self.index_directories(dir.clone()).await {
      Ok(dirs) => dirs,
      Err(WatchError::IndexDir(e)) if e.is_not_found() => {
        error!(path = %dir.display(), error = %e, "New directory vanished before it could be indexed");
        return Ok(());
      }
      Err(e) => return Err(e),
    };

    for dir in &dirs {
      self.subscribe(dir.clone())?;
    }

    let now = Instant::now();
    for dir in &dirs {
      let paths = match list_files(dir).await {
        Ok(paths) => paths,
        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
        Err(source) => {
          return Err(WatchError::Io {
            path: dir.clone(),
            source,
          });
        }
      };
      for path in paths {
        if self.accepts(&path) && self.registry.touch(&path, now) {
          debug!(path = %path.display(), "New file detected");
        }
      }
    }

    Ok(())
  }

  fn subscribe(&mut self, dir: PathBuf) -> Result<(), WatchError> {
    if self.watched.contains(&dir) {
      return Ok(());
    }

    match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
      Ok(()) => {
        trace!(path = %dir.display(), "Directory watched");
        self.watched.insert(dir);
        Ok(())
      }
      Err(e) if is_not_found(&e) => {
        warn!(path = %dir.display(), "Directory vanished before it could be watched");
        Ok(())
      }
      Err(source) => Err(WatchError::Subscribe { path: dir, source }),
    }
  }

  /// Forget a removed path: its pending timer, and the watches on it and below
  fn release(&mut self, path: &Path) {
    self.registry.cancel(path);
    self.registry.clear_retries(path);

    if !self.watched.contains(path) {
      return;
    }

    let released: Vec<PathBuf> = self.watched.iter().filter(|dir| dir.starts_with(path)).cloned().collect();
    for dir in released {
      // The kernel drops watches on deleted directories itself
      if let Err(e) = self.watcher.unwatch(&dir) {
        trace!(path = %dir.display(), error = %e, "Unwatch failed");
      }
      self.watched.remove(&dir);
    }
    debug!(path = %path.display(), "Removed directory released");
  }

  /// Emit a path whose quiet window passed
  async fn settle(
    &mut self,
    path: PathBuf,
    files: &mpsc::Sender<ReadyFile>,
    cancel: &CancellationToken,
  ) -> Result<(), WatchError> {
    if !self.accepts(&path) {
      debug!(path = %path.display(), "Settled file ignored");
      return Ok(());
    }

    match tokio::fs::metadata(&path).await {
      Ok(metadata) if metadata.is_dir() => {
        if !self.watched.contains(&path) {
          self.add_directory(path).await?;
        }
        return Ok(());
      }
      Ok(_) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        error!(path = %path.display(), "Event dropped, path no longer exists");
        return Ok(());
      }
      Err(e) => {
        self.retry(&path, &e);
        return Ok(());
      }
    }

    let bytes = if self.skip_content {
      Vec::new()
    } else {
      match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
          error!(path = %path.display(), "Event dropped, file removed before it could be read");
          return Ok(());
        }
        Err(e) => {
          self.retry(&path, &e);
          return Ok(());
        }
      }
    };

    self.registry.clear_retries(&path);
    let Some(file) = ReadyFile::new(&self.root, path, bytes, Utc::now()) else {
      return Ok(());
    };
    info!(path = %file.path.display(), bytes = file.bytes.len(), "New file ready");
    emit(files, cancel, file).await
  }

  /// Requeue a path behind the quiet window, or drop it past the retry limit
  fn retry(&mut self, path: &Path, error: &io::Error) {
    let attempt = self.registry.record_retry(path);
    if self.registry.retries_exhausted(path) {
      error!(path = %path.display(), attempt, error = %error, "Event dropped after too many retries");
      self.registry.cancel(path);
    } else {
      warn!(path = %path.display(), attempt, error = %error, "Event retried");
      self.registry.touch(path, Instant::now());
    }
  }

  fn accepts(&self, path: &Path) -> bool {
    path
      .file_name()
      .is_some_and(|name| self.filter.accepts(name.to_string_lossy().as_ref()))
  }
}

#[async_trait]
impl FileSource for DirectoryWatcher {
  async fn watch(mut self, files: mpsc::Sender<ReadyFile>, cancel: CancellationToken) -> Result<(), WatchError> {
    match self.run(&files, &cancel).await {
      Ok(()) | Err(WatchError::Cancelled) => {
        self.set_phase(WatchPhase::Stopped);
        info!(root = %self.root.display(), "Directory watcher stopped");
        Ok(())
      }
      Err(e) => {
        self.set_phase(WatchPhase::Failed);
        error!(root = %self.root.display(), error = %e, "Directory watcher failed");
        Err(e)
      }
    }
  }
}

// ============================================================================
// Helpers
// ============================================================================

/// Push `file` onto the queue, waiting while it is full
async fn emit(files: &mpsc::Sender<ReadyFile>, cancel: &CancellationToken, file: ReadyFile) -> Result<(), WatchError> {
  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(WatchError::Cancelled),
    sent = files.send(file) => sent.map_err(|_| WatchError::QueueClosed),
  }
}

/// Regular files directly inside `dir`, sorted by path
async fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
  let mut entries = tokio::fs::read_dir(dir).await?;
  let mut paths = Vec::new();
  while let Some(entry) = entries.next_entry().await? {
    if entry.file_type().await?.is_file() {
      paths.push(entry.path());
    }
  }
  paths.sort();
  Ok(paths)
}

fn is_not_found(error: &notify::Error) -> bool {
  match &error.kind {
    notify::ErrorKind::PathNotFound => true,
    notify::ErrorKind::Io(e) => e.kind() == io::ErrorKind::NotFound,
    _ => false,
  }
}
