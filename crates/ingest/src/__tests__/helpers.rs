//! Test helpers for watcher and ingestor integration tests.
//!
//! Provides `TestTree` for temporary watch roots, a watcher harness that waits
//! for the live phase, and scripted parser/sink/source collaborators.

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingest_core::WatchConfig;
use tempfile::TempDir;
use tokio::{
  sync::{Semaphore, mpsc, watch},
  task::JoinHandle,
  time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
  contract::{FileSource, ParseError, Parser, Record, Sink, SinkError},
  file::ReadyFile,
  watcher::{DirectoryWatcher, WatchError, WatchPhase},
};

/// Temporary watch root, canonicalized so emitted paths compare equal
pub struct TestTree {
  _dir: TempDir,
  pub root: PathBuf,
}

impl TestTree {
  pub fn new() -> Self {
    let dir = TempDir::new().expect("create temp dir");
    let root = std::fs::canonicalize(dir.path()).expect("canonicalize temp dir");
    Self { _dir: dir, root }
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.root.join(relative)
  }

  /// Write a file, creating parent directories
  pub fn write(&self, relative: &str, content: &str) -> PathBuf {
    let path = self.path(relative);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(&path, content).expect("write file");
    path
  }

  /// A ready file for a file written into the tree
  pub fn ready(&self, relative: &str, content: &str) -> ReadyFile {
    let path = self.write(relative, content);
    ReadyFile::new(&self.root, path, content.as_bytes().to_vec(), Utc::now()).expect("file inside root")
  }

  /// Watch config with a short quiet window for tests
  pub fn watch_config(&self) -> WatchConfig {
    WatchConfig {
      debounce_ms: 200,
      ..WatchConfig::new(&self.root)
    }
  }
}

// ============================================================================
// Watcher Harness
// ============================================================================

pub struct WatchHarness {
  pub files: mpsc::Receiver<ReadyFile>,
  pub phase: watch::Receiver<WatchPhase>,
  pub cancel: CancellationToken,
  pub task: JoinHandle<Result<(), WatchError>>,
}

impl WatchHarness {
  /// Spawn a watcher and wait until it is live
  pub async fn start(config: WatchConfig) -> Self {
    let watcher = DirectoryWatcher::new(&config).expect("create watcher");
    let mut phase = watcher.subscribe_phase();
    let (tx, files) = mpsc::channel(100);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(watcher.watch(tx, cancel.clone()));

    timeout(Duration::from_secs(5), phase.wait_for(|p| *p == WatchPhase::LiveWatching))
      .await
      .expect("timeout waiting for live phase")
      .expect("watcher dropped before going live");

    Self {
      files,
      phase,
      cancel,
      task,
    }
  }

  /// Files emitted so far without waiting
  pub fn drain(&mut self) -> Vec<ReadyFile> {
    let mut files = Vec::new();
    while let Ok(file) = self.files.try_recv() {
      files.push(file);
    }
    files
  }

  pub async fn next_file(&mut self) -> ReadyFile {
    timeout(Duration::from_secs(5), self.files.recv())
      .await
      .expect("timeout waiting for ready file")
      .expect("watcher closed the queue")
  }

  /// Assert nothing else is emitted within `window`
  pub async fn assert_quiet(&mut self, window: Duration) {
    if let Ok(Some(file)) = timeout(window, self.files.recv()).await {
      panic!("unexpected ready file: {}", file.path.display());
    }
  }

  pub async fn stop(self) -> Result<(), WatchError> {
    self.cancel.cancel();
    timeout(Duration::from_secs(5), self.task)
      .await
      .expect("timeout waiting for watcher to stop")
      .expect("watcher task panicked")
  }
}

/// Poll `condition` until it holds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
  let result = timeout(Duration::from_secs(5), async {
    while !condition() {
      sleep(Duration::from_millis(20)).await;
    }
  })
  .await;
  assert!(result.is_ok(), "timeout waiting for {}", what);
}

// ============================================================================
// Scripted Collaborators
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TestRecord {
  pub name: String,
  pub received: Option<DateTime<Utc>>,
}

impl Record for TestRecord {
  fn set_received_time(&mut self, received: DateTime<Utc>) {
    self.received = Some(received);
  }
}

/// Parses by content: `malformed` fails, `ignore` is ignorable, `panic`
/// panics, anything else becomes a record named after the file
pub struct ContentParser;

impl Parser for ContentParser {
  type Record = TestRecord;

  fn parse(&self, file: &ReadyFile) -> Result<TestRecord, ParseError> {
    match file.bytes.as_slice() {
      b"malformed" => Err(ParseError::Malformed("unexpected token".to_string())),
      b"ignore" => Err(ParseError::Ignorable("nothing to index".to_string())),
      b"panic" => panic!("parser bug"),
      _ => Ok(TestRecord {
        name: file.name.clone(),
        received: None,
      }),
    }
  }
}

#[derive(Default)]
struct SinkState {
  failures: HashMap<String, u32>,
  always_fail: bool,
  calls: Vec<TestRecord>,
}

/// Sink that fails a configured number of times per record, recording every call
#[derive(Clone, Default)]
pub struct FlakySink {
  state: Arc<Mutex<SinkState>>,
}

impl FlakySink {
  pub fn failing(name: &str, times: u32) -> Self {
    let sink = Self::default();
    sink.state.lock().unwrap().failures.insert(name.to_string(), times);
    sink
  }

  pub fn always_failing() -> Self {
    let sink = Self::default();
    sink.state.lock().unwrap().always_fail = true;
    sink
  }

  pub fn calls(&self) -> Vec<TestRecord> {
    self.state.lock().unwrap().calls.clone()
  }

  pub fn call_count(&self) -> usize {
    self.state.lock().unwrap().calls.len()
  }
}

#[async_trait]
impl Sink<TestRecord> for FlakySink {
  async fn index(&self, record: &TestRecord) -> Result<(), SinkError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(record.clone());
    if state.always_fail {
      return Err(SinkError::Unavailable("indexer down".to_string()));
    }
    match state.failures.get_mut(&record.name) {
      Some(left) if *left > 0 => {
        *left -= 1;
        Err(SinkError::Unavailable("indexer down".to_string()))
      }
      _ => Ok(()),
    }
  }
}

/// Sink that holds every call until [`GatedSink::open`]
#[derive(Clone)]
pub struct GatedSink {
  gate: Arc<Semaphore>,
  calls: Arc<AtomicUsize>,
}

impl GatedSink {
  pub fn closed() -> Self {
    Self {
      gate: Arc::new(Semaphore::new(0)),
      calls: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// Release every held and future call
  pub fn open(&self) {
    self.gate.close();
  }

  pub fn call_count(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Sink<TestRecord> for GatedSink {
  async fn index(&self, _record: &TestRecord) -> Result<(), SinkError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    // A closed semaphore fails the acquire, which is the release signal
    let _ = self.gate.acquire().await;
    Ok(())
  }
}

/// Source that emits a fixed list of files and closes
pub struct ListSource(pub Vec<ReadyFile>);

#[async_trait]
impl FileSource for ListSource {
  async fn watch(self, files: mpsc::Sender<ReadyFile>, _cancel: CancellationToken) -> Result<(), WatchError> {
    for file in self.0 {
      files.send(file).await.map_err(|_| WatchError::QueueClosed)?;
    }
    Ok(())
  }
}

/// Source that emits its files, waits, then fails
pub struct FailingSource {
  pub files: Vec<ReadyFile>,
  pub after: Duration,
}

impl FailingSource {
  pub fn immediately() -> Self {
    Self {
      files: Vec::new(),
      after: Duration::ZERO,
    }
  }
}

#[async_trait]
impl FileSource for FailingSource {
  async fn watch(self, files: mpsc::Sender<ReadyFile>, _cancel: CancellationToken) -> Result<(), WatchError> {
    for file in self.files {
      files.send(file).await.map_err(|_| WatchError::QueueClosed)?;
    }
    sleep(self.after).await;
    Err(WatchError::Notify(notify::Error::generic("inotify queue overflow")))
  }
}
