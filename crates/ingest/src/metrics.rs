//! Ingestion counters.
//!
//! Every counter is kept twice: in-process atomics for [`MetricsSnapshot`],
//! and through the `metrics` facade so an installed recorder (the Prometheus
//! exporter in `ingestd`) can serve them while the service runs. Without a
//! recorder the facade calls are no-ops.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, describe_counter};
use serde::Serialize;

pub const FILES_RECEIVED: &str = "files_received";
pub const DOCUMENTS_INDEXED: &str = "documents_indexed";
pub const FILES_IGNORED: &str = "files_ignored";
pub const FILES_QUARANTINED: &str = "files_quarantined";
pub const INDEX_FAILURES: &str = "index_failures";
pub const FILES_REQUEUED: &str = "files_requeued";
pub const FILES_DEAD_LETTERED: &str = "files_dead_lettered";

/// Register help text for every ingestion counter with the installed recorder
pub fn describe_metrics() {
  describe_counter!(FILES_RECEIVED, "Files handed to a worker, requeues included");
  describe_counter!(DOCUMENTS_INDEXED, "Number of documents indexed");
  describe_counter!(FILES_IGNORED, "Files deleted without indexing");
  describe_counter!(FILES_QUARANTINED, "Files moved to the unprocessable directory");
  describe_counter!(INDEX_FAILURES, "Failed index attempts");
  describe_counter!(FILES_REQUEUED, "Files requeued after a failed index attempt");
  describe_counter!(FILES_DEAD_LETTERED, "Files quarantined after exhausting their index attempts");
}

/// Lock-free counters shared between the ingestor's tasks
#[derive(Debug, Default)]
pub struct IngestMetrics {
  files_received: AtomicU64,
  documents_indexed: AtomicU64,
  files_ignored: AtomicU64,
  files_quarantined: AtomicU64,
  index_failures: AtomicU64,
  files_requeued: AtomicU64,
  files_dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`IngestMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
  pub files_received: u64,
  pub documents_indexed: u64,
  pub files_ignored: u64,
  pub files_quarantined: u64,
  pub index_failures: u64,
  pub files_requeued: u64,
  pub files_dead_lettered: u64,
}

impl IngestMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn file_received(&self) {
    self.files_received.fetch_add(1, Ordering::Relaxed);
    counter!(FILES_RECEIVED).increment(1);
  }

  pub fn document_indexed(&self) {
    self.documents_indexed.fetch_add(1, Ordering::Relaxed);
    counter!(DOCUMENTS_INDEXED).increment(1);
  }

  pub fn file_ignored(&self) {
    self.files_ignored.fetch_add(1, Ordering::Relaxed);
    counter!(FILES_IGNORED).increment(1);
  }

  pub fn file_quarantined(&self) {
    self.files_quarantined.fetch_add(1, Ordering::Relaxed);
    counter!(FILES_QUARANTINED).increment(1);
  }

  pub fn index_failed(&self) {
    self.index_failures.fetch_add(1, Ordering::Relaxed);
    counter!(INDEX_FAILURES).increment(1);
  }

  pub fn file_requeued(&self) {
    self.files_requeued.fetch_add(1, Ordering::Relaxed);
    counter!(FILES_REQUEUED).increment(1);
  }

  pub fn file_dead_lettered(&self) {
    self.files_dead_lettered.fetch_add(1, Ordering::Relaxed);
    counter!(FILES_DEAD_LETTERED).increment(1);
  }

  pub fn documents_indexed(&self) -> u64 {
    self.documents_indexed.load(Ordering::Relaxed)
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      files_received: self.files_received.load(Ordering::Relaxed),
      documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
      files_ignored: self.files_ignored.load(Ordering::Relaxed),
      files_quarantined: self.files_quarantined.load(Ordering::Relaxed),
      index_failures: self.index_failures.load(Ordering::Relaxed),
      files_requeued: self.files_requeued.load(Ordering::Relaxed),
      files_dead_lettered: self.files_dead_lettered.load(Ordering::Relaxed),
    }
  }
}
