//! Ingestor - pulls ready files off the watcher and drives them to an outcome
//!
//! Every file ends in exactly one of three places:
//! - indexed by the sink, then deleted
//! - quarantined under `<root>/unprocessable/<relative>` when it cannot be parsed
//! - deleted unindexed when the parser reports it as ignorable
//!
//! Sink failures requeue the file with capped exponential backoff. Unless
//! `max_index_attempts` is configured, a file is retried until the sink accepts
//! it or the process stops, and it is never deleted before a confirmed index.
//!
//! # Concurrency
//!
//! The file source runs in its own task and feeds a bounded queue. A single
//! dispatcher takes a worker permit first and only then pulls the next file, so
//! at most `workers` files are in flight and a failing source is noticed even
//! while every worker is busy. Parsing runs on the blocking pool. Workers
//! release their permit before backing off, which keeps a full queue from
//! starving the dispatcher. On cancellation dispatch stops and in-flight
//! workers run to completion.

use std::{sync::Arc, time::Duration};

use ingest_core::{ConfigError, IngestConfig};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, debug, error, info, warn};

use crate::{
  contract::{FileSource, ParseError, Parser, Record, Sink},
  file::ReadyFile,
  metrics::IngestMetrics,
  store::FileStore,
  watcher::WatchError,
};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that end [`Ingestor::run`]
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("File watcher failed: {0}")]
  Watch(#[source] WatchError),

  #[error("File watcher task panicked: {0}")]
  WatcherPanicked(#[source] tokio::task::JoinError),
}

// ============================================================================
// Requeue Policy
// ============================================================================

/// Backoff and dead-letter policy applied after a sink failure
#[derive(Debug, Clone, PartialEq)]
pub struct RequeuePolicy {
  /// Delay before the first requeue
  pub initial_backoff: Duration,
  /// Ceiling on the delay
  pub max_backoff: Duration,
  /// Growth factor per failed attempt
  pub backoff_multiplier: f64,
  /// Failed attempts before the file is quarantined; `None` retries forever
  pub max_attempts: Option<u32>,
}

impl Default for RequeuePolicy {
  fn default() -> Self {
    Self::from_config(&IngestConfig::default())
  }
}

impl RequeuePolicy {
  pub fn from_config(config: &IngestConfig) -> Self {
    Self {
      initial_backoff: Duration::from_millis(config.requeue_initial_backoff_ms),
      max_backoff: Duration::from_millis(config.requeue_max_backoff_ms),
      backoff_multiplier: config.requeue_backoff_multiplier,
      max_attempts: config.max_index_attempts,
    }
  }

  /// Delay before requeueing a file that has failed `attempts` times
  pub fn backoff_for_attempt(&self, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
    if !base.is_finite() {
      return self.max_backoff;
    }
    Duration::from_secs_f64(base.min(self.max_backoff.as_secs_f64()).max(0.0))
  }

  /// Whether a file that has failed `attempts` times goes to the dead-letter path
  pub fn exhausted(&self, attempts: u32) -> bool {
    self.max_attempts.is_some_and(|max| attempts >= max)
  }
}

// ============================================================================
// Ingestor
// ============================================================================

/// Orchestrates a file source, a parser and a sink
pub struct Ingestor<S, P, K> {
  source: S,
  worker: Worker<P, K>,
  queue_capacity: usize,
  workers: usize,
}

/// Shared per-file processing state
struct Worker<P, K> {
  parser: Arc<P>,
  sink: Arc<K>,
  store: FileStore,
  metrics: Arc<IngestMetrics>,
  policy: RequeuePolicy,
}

impl<P, K> Clone for Worker<P, K> {
  fn clone(&self) -> Self {
    Self {
      parser: self.parser.clone(),
      sink: self.sink.clone(),
      store: self.store.clone(),
      metrics: self.metrics.clone(),
      policy: self.policy.clone(),
    }
  }
}

impl<S, P, K> Ingestor<S, P, K>
where
  S: FileSource,
  P: Parser,
  K: Sink<P::Record>,
{
  pub fn new(source: S, parser: P, sink: K, store: FileStore, config: &IngestConfig) -> Result<Self, IngestError> {
    config.validate()?;
    Ok(Self {
      source,
      worker: Worker {
        parser: Arc::new(parser),
        sink: Arc::new(sink),
        store,
        metrics: Arc::new(IngestMetrics::new()),
        policy: RequeuePolicy::from_config(config),
      },
      queue_capacity: config.queue_capacity,
      workers: config.workers,
    })
  }

  pub fn metrics(&self) -> Arc<IngestMetrics> {
    self.worker.metrics.clone()
  }

  /// Run until `cancel` fires or the file source fails.
  ///
  /// A source that returns `Ok` stops producing but queued and requeued files
  /// keep being processed until cancellation. A source error cancels `cancel`
  /// and is returned once in-flight files have finished.
  pub async fn run(self, cancel: CancellationToken) -> Result<(), IngestError> {
    let Self {
      source,
      worker,
      queue_capacity,
      workers,
    } = self;

    let (queue, mut ready) = mpsc::channel::<ReadyFile>(queue_capacity);
    let mut watcher = tokio::spawn(source.watch(queue.clone(), cancel.clone()).in_current_span());
    let mut watcher_running = true;

    let permits = Arc::new(Semaphore::new(workers));
    let mut permit: Option<OwnedSemaphorePermit> = None;
    let tracker = TaskTracker::new();

    info!(workers, queue_capacity, "Ingestor started");

    let result = loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Ingestor shutting down (cancelled)");
          break Ok(());
        }

        joined = &mut watcher, if watcher_running => {
          watcher_running = false;
          match joined {
            Ok(Ok(())) => info!("File source closed, processing remaining files"),
            Ok(Err(e)) => {
              error!(error = %e, "File watcher failed, stopping ingestion");
              cancel.cancel();
              break Err(IngestError::Watch(e));
            }
            Err(e) => {
              error!(error = %e, "File watcher task panicked, stopping ingestion");
              cancel.cancel();
              break Err(IngestError::WatcherPanicked(e));
            }
          }
        }

        acquired = permits.clone().acquire_owned(), if permit.is_none() => {
          let Ok(acquired) = acquired else { break Ok(()) };
          permit = Some(acquired);
        }

        file = ready.recv(), if permit.is_some() => {
          // The dispatcher holds a sender for requeues, so the queue never closes
          let Some(file) = file else { break Ok(()) };
          let Some(permit) = permit.take() else { continue };

          worker.metrics.file_received();
          info!(path = %file.path.display(), attempts = file.attempts, "File received for processing");

          tracker.spawn(
            worker
              .clone()
              .process(file, permit, queue.clone(), cancel.clone())
              .in_current_span(),
          );
        }
      }
    };

    tracker.close();
    if !tracker.is_empty() {
      debug!(in_flight = tracker.len(), "Waiting for in-flight files");
    }
    tracker.wait().await;

    if watcher_running {
      match watcher.await {
        Ok(Err(e)) => warn!(error = %e, "File watcher failed during shutdown"),
        Err(e) => warn!(error = %e, "File watcher task panicked during shutdown"),
        Ok(Ok(())) => {}
      }
    }

    info!(indexed = worker.metrics.documents_indexed(), "Ingestor stopped");
    result
  }
}

impl<P, K> Worker<P, K>
where
  P: Parser,
  K: Sink<P::Record>,
{
  /// Drive one file to an outcome: indexed and deleted, ignored, quarantined,
  /// or requeued
  async fn process(
    self,
    file: ReadyFile,
    permit: OwnedSemaphorePermit,
    queue: mpsc::Sender<ReadyFile>,
    cancel: CancellationToken,
  ) {
    let (parsed, mut file) = self.parse(file).await;
    let mut record = match parsed {
      Ok(Ok(record)) => record,
      Ok(Err(ParseError::Ignorable(reason))) => {
        info!(path = %file.path.display(), reason = %reason, "Ignorable file");
        self.metrics.file_ignored();
        self.delete(&file, "Deleting ignorable file failed").await;
        return;
      }
      Ok(Err(e)) => {
        error!(path = %file.path.display(), error = %e, "Parsing failed");
        self.quarantine(&file).await;
        return;
      }
      Err(e) => {
        error!(path = %file.path.display(), error = %e, "Parser panicked");
        self.quarantine(&file).await;
        return;
      }
    };

    record.set_received_time(file.received_time);

    match self.sink.index(&record).await {
      Ok(()) => {
        info!(path = %file.path.display(), "File indexed");
        self.delete(&file, "Deleting indexed file failed").await;
        self.metrics.document_indexed();
      }
      Err(e) => {
        file.attempts += 1;
        self.metrics.index_failed();
        error!(path = %file.path.display(), attempt = file.attempts, error = %e, "Indexing failed");

        if self.policy.exhausted(file.attempts) {
          error!(path = %file.path.display(), attempts = file.attempts, "Index attempts exhausted, dead-lettering file");
          if self.quarantine(&file).await {
            self.metrics.file_dead_lettered();
          }
          return;
        }

        drop(permit);
        self.requeue(file, queue, cancel).await;
      }
    }
  }

  /// Run the parser on the blocking pool, handing the file back afterwards
  async fn parse(
    &self,
    file: ReadyFile,
  ) -> (Result<Result<P::Record, ParseError>, tokio::task::JoinError>, ReadyFile) {
    let file = Arc::new(file);
    let parser = self.parser.clone();
    let shared = file.clone();
    let parsed = tokio::task::spawn_blocking(move || parser.parse(&shared)).await;
    (parsed, Arc::unwrap_or_clone(file))
  }

  async fn requeue(&self, file: ReadyFile, queue: mpsc::Sender<ReadyFile>, cancel: CancellationToken) {
    let delay = self.policy.backoff_for_attempt(file.attempts);
    debug!(path = %file.path.display(), delay_ms = delay.as_millis() as u64, "Requeueing after backoff");

    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        warn!(path = %file.path.display(), "Shutdown during requeue backoff, file left on disk");
        return;
      }
      _ = tokio::time::sleep(delay) => {}
    }

    let path = file.path.clone();
    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        warn!(path = %path.display(), "Shutdown during requeue, file left on disk");
      }
      sent = queue.send(file) => match sent {
        Ok(()) => self.metrics.file_requeued(),
        Err(_) => warn!(path = %path.display(), "Queue closed during requeue, file left on disk"),
      }
    }
  }

  async fn delete(&self, file: &ReadyFile, failure: &'static str) {
    match self.store.delete(file).await {
      Ok(()) => info!(path = %file.path.display(), "File deleted"),
      Err(e) => error!(path = %file.path.display(), error = %e, "{}", failure),
    }
  }

  /// Returns whether the file was moved
  async fn quarantine(&self, file: &ReadyFile) -> bool {
    match self.store.quarantine(file).await {
      Ok(target) => {
        info!(path = %file.path.display(), target = %target.display(), "File moved to quarantine");
        self.metrics.file_quarantined();
        true
      }
      Err(e) => {
        error!(path = %file.path.display(), error = %e, "Moving file to quarantine failed");
        false
      }
    }
  }
}
