//! Directory watching and ingestion orchestration.
//!
//! # Pipeline
//!
//! ```text
//! DirectoryWatcher → queue (bounded) → Ingestor → Parser → Sink → FileStore
//!                      ↑                                   │
//!                      └──────── requeue on sink failure ──┘
//! ```
//!
//! - [`DirectoryWatcher`] scans the tree, then watches it, emitting a
//!   [`ReadyFile`] once a file has settled
//! - [`Ingestor`] parses each file, hands the record to the sink, and deletes,
//!   quarantines or requeues it depending on the outcome
//!
//! Content formats and sink transports are plugged in through the [`Parser`]
//! and [`Sink`] traits.

pub mod contract;
pub mod debounce;
pub mod dirs;
pub mod file;
pub mod filter;
pub mod ingestor;
pub mod metrics;
pub mod store;
pub mod watcher;


pub use contract::{FileSource, ParseError, Parser, Record, Sink, SinkError};
pub use debounce::{DebounceRegistry, DebounceState};
pub use dirs::{IndexDirError, find_valid_directories};
pub use file::ReadyFile;
pub use filter::{FilterError, PathFilter};
pub use ingestor::{IngestError, Ingestor, RequeuePolicy};
pub use self::metrics::{IngestMetrics, MetricsSnapshot, describe_metrics};
pub use store::{FileStore, StoreError};
pub use watcher::{DirectoryWatcher, WatchError, WatchPhase};
