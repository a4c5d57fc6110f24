//! Per-path debouncing of filesystem notifications.
//!
//! A file is not emitted while it is still being written. Every relevant event
//! for a path pushes its deadline out to `now + quiet_window`; once a deadline
//! passes without another event the path has settled.
//!
//! The registry is plain owned state: it never spawns timers. The watcher's
//! coordinator loop sleeps until [`DebounceRegistry::next_deadline`] and then
//! collects [`DebounceRegistry::take_settled`]. Deadlines live in a min-heap
//! with lazy invalidation, so re-arming a path is O(log n) and stale heap
//! entries are discarded when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

/// Default quiet window before a file counts as settled
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(250);

/// Retries allowed per path before its events are dropped
pub const MAX_EVENT_RETRIES: u32 = 10;

/// Debounce state of a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
  /// No timer armed
  Idle,
  /// Settles at the given deadline unless touched again
  Pending(Instant),
}

#[derive(Debug)]
pub struct DebounceRegistry {
  quiet: Duration,
  max_retries: u32,
  pending: HashMap<PathBuf, Instant>,
  deadlines: BinaryHeap<Reverse<(Instant, PathBuf)>>,
  retries: HashMap<PathBuf, u32>,
}

impl Default for DebounceRegistry {
  fn default() -> Self {
    Self::new(DEFAULT_QUIET_WINDOW, MAX_EVENT_RETRIES)
  }
}

impl DebounceRegistry {
  pub fn new(quiet: Duration, max_retries: u32) -> Self {
    Self {
      quiet,
      max_retries,
      pending: HashMap::new(),
      deadlines: BinaryHeap::new(),
      retries: HashMap::new(),
    }
  }

  pub fn quiet_window(&self) -> Duration {
    self.quiet
  }

  pub fn state(&self, path: &Path) -> DebounceState {
    match self.pending.get(path) {
      Some(deadline) => DebounceState::Pending(*deadline),
      None => DebounceState::Idle,
    }
  }

  /// Number of paths waiting to settle
  pub fn pending_len(&self) -> usize {
    self.pending.len()
  }

  /// Arm the timer for `path`, or push an armed timer back to `now + quiet`.
  ///
  /// Returns true when the path was idle before this call.
  pub fn touch(&mut self, path: &Path, now: Instant) -> bool {
    let deadline = now + self.quiet;
    let was_idle = self.pending.insert(path.to_path_buf(), deadline).is_none();
    self.deadlines.push(Reverse((deadline, path.to_path_buf())));
    was_idle
  }

  /// Disarm the timer for `path` without settling it.
  ///
  /// Returns true if a timer was armed.
  pub fn cancel(&mut self, path: &Path) -> bool {
    self.pending.remove(path).is_some()
  }

  /// Earliest live deadline, discarding stale heap entries on the way
  pub fn next_deadline(&mut self) -> Option<Instant> {
    while let Some(Reverse((deadline, path))) = self.deadlines.peek() {
      if self.pending.get(path) == Some(deadline) {
        return Some(*deadline);
      }
      self.deadlines.pop();
    }
    None
  }

  /// Remove and return every path whose deadline is at or before `now`
  pub fn take_settled(&mut self, now: Instant) -> Vec<PathBuf> {
    let mut settled = Vec::new();
    while let Some(Reverse((deadline, _))) = self.deadlines.peek() {
      if *deadline > now {
        break;
      }
      let Some(Reverse((deadline, path))) = self.deadlines.pop() else {
        break;
      };
      if self.pending.get(&path) == Some(&deadline) {
        self.pending.remove(&path);
        settled.push(path);
      }
    }
    settled
  }

  // ========================================================================
  // Retry Tracking
  // ========================================================================

  /// Count one more failed attempt for `path` and return the total
  pub fn record_retry(&mut self, path: &Path) -> u32 {
    let attempts = self.retries.entry(path.to_path_buf()).or_insert(0);
    *attempts += 1;
    *attempts
  }

  pub fn retries(&self, path: &Path) -> u32 {
    self.retries.get(path).copied().unwrap_or(0)
  }

  /// Whether `path` has gone past the retry ceiling
  pub fn retries_exhausted(&self, path: &Path) -> bool {
    self.retries(path) > self.max_retries
  }

  pub fn clear_retries(&mut self, path: &Path) {
    self.retries.remove(path);
  }
}
