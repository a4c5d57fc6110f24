use std::{fs::OpenOptions, io::Write, path::PathBuf, time::Duration};

use chrono::{TimeZone, Utc};
use filetime::FileTime;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::helpers::{TestTree, WatchHarness};
use crate::watcher::WatchPhase;

const QUIET: Duration = Duration::from_millis(800);

#[tokio::test]
async fn test_existing_files_are_emitted_with_mtime() {
  let tree = TestTree::new();
  let a = tree.write("a.json", "{\"a\":1}");
  tree.write("feeds/b.json", "{}");
  tree.write("unprocessable/old.json", "{}");
  tree.write("feeds/redirect/skip.json", "{}");
  tree.write("c.tmp", "partial");
  filetime::set_file_mtime(&a, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

  let mut config = tree.watch_config();
  config.ignored_patterns = vec![r"\.tmp$".to_string()];
  let mut harness = WatchHarness::start(config).await;

  let files = harness.drain();
  let relative: Vec<PathBuf> = files.iter().map(|f| f.relative.clone()).collect();
  assert_eq!(relative, vec![PathBuf::from("a.json"), PathBuf::from("feeds/b.json")]);

  assert_eq!(files[0].name, "a.json");
  assert_eq!(files[0].path, a);
  assert_eq!(files[0].bytes, b"{\"a\":1}".to_vec());
  assert_eq!(files[0].received_time, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
  assert_eq!(files[0].attempts, 0);

  harness.assert_quiet(QUIET).await;
  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_burst_of_writes_yields_one_file() {
  let tree = TestTree::new();
  let mut harness = WatchHarness::start(tree.watch_config()).await;

  let path = tree.path("b.tmp");
  let mut file = std::fs::File::create(&path).unwrap();
  for chunk in ["one,", "two,", "three"] {
    file.write_all(chunk.as_bytes()).unwrap();
    file.flush().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  drop(file);

  let ready = harness.next_file().await;
  assert_eq!(ready.name, "b.tmp");
  assert_eq!(ready.path, path);
  assert_eq!(ready.bytes, b"one,two,three".to_vec());

  harness.assert_quiet(QUIET).await;
  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_live_file_gets_settle_time() {
  let tree = TestTree::new();
  let mut harness = WatchHarness::start(tree.watch_config()).await;

  let before = Utc::now();
  tree.write("live.json", "{}");
  let ready = harness.next_file().await;

  assert_eq!(ready.relative, PathBuf::from("live.json"));
  assert!(ready.received_time >= before);
  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_file_in_new_nested_directory_is_emitted_once() {
  let tree = TestTree::new();
  let mut harness = WatchHarness::start(tree.watch_config()).await;

  std::fs::create_dir_all(tree.path("a/b/c")).unwrap();
  tree.write("a/b/c/d.json", "{\"d\":true}");

  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("a/b/c/d.json"));
  assert_eq!(ready.bytes, b"{\"d\":true}".to_vec());
  harness.assert_quiet(QUIET).await;

  // The new subtree is watched from now on
  tree.write("a/b/e.json", "{}");
  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("a/b/e.json"));

  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_ignored_directories_and_patterns_are_never_emitted() {
  let tree = TestTree::new();
  std::fs::create_dir_all(tree.path("feeds")).unwrap();

  let mut config = tree.watch_config();
  config.ignored_dirs = vec!["cache".to_string()];
  config.ignored_patterns = vec![r"^\.".to_string()];
  let mut harness = WatchHarness::start(config).await;

  tree.write("unprocessable/x.json", "{}");
  tree.write("redirect/y.json", "{}");
  tree.write("cache/z.json", "{}");
  tree.write("feeds/cache/w.json", "{}");
  tree.write(".hidden.json", "{}");
  harness.assert_quiet(QUIET).await;

  tree.write("feeds/ok.json", "{}");
  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("feeds/ok.json"));
  harness.assert_quiet(QUIET).await;

  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_skip_content_emits_empty_bytes() {
  let tree = TestTree::new();
  tree.write("existing.json", "{\"big\":true}");

  let mut config = tree.watch_config();
  config.skip_content = true;
  let mut harness = WatchHarness::start(config).await;

  let existing = harness.drain();
  assert_eq!(existing.len(), 1);
  assert!(existing[0].bytes.is_empty());

  tree.write("live.json", "{\"big\":true}");
  let ready = harness.next_file().await;
  assert_eq!(ready.name, "live.json");
  assert!(ready.bytes.is_empty());

  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_stops_watch_cleanly() {
  let tree = TestTree::new();
  let harness = WatchHarness::start(tree.watch_config()).await;
  let phase = harness.phase.clone();

  assert_eq!(*phase.borrow(), WatchPhase::LiveWatching);
  harness.stop().await.unwrap();
  assert_eq!(*phase.borrow(), WatchPhase::Stopped);
}

#[tokio::test]
async fn test_removed_directory_is_released() {
  let tree = TestTree::new();
  tree.write("gone/a.json", "{}");
  let mut harness = WatchHarness::start(tree.watch_config()).await;
  assert_eq!(harness.drain().len(), 1);

  std::fs::remove_dir_all(tree.path("gone")).unwrap();
  harness.assert_quiet(QUIET).await;

  // Recreating the directory picks it up again
  tree.write("gone/b.json", "{}");
  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("gone/b.json"));

  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_reopened_writes_yield_one_file() {
  let tree = TestTree::new();
  let mut harness = WatchHarness::start(tree.watch_config()).await;

  let path = tree.path("b.tmp");
  for chunk in ["one,", "two,", "three"] {
    let mut file = OpenOptions::new().create(true).append(true).open(&path).unwrap();
    file.write_all(chunk.as_bytes()).unwrap();
    drop(file);
    tokio::time::sleep(Duration::from_millis(50)).await;
  }

  let ready = harness.next_file().await;
  assert_eq!(ready.name, "b.tmp");
  assert_eq!(ready.bytes, b"one,two,three".to_vec());

  harness.assert_quiet(QUIET).await;
  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_file_renamed_into_place_is_emitted() {
  let tree = TestTree::new();
  let mut config = tree.watch_config();
  config.ignored_patterns = vec![r"\.part$".to_string()];
  let mut harness = WatchHarness::start(config).await;

  tree.write("incoming.part", "{\"n\":1}");
  harness.assert_quiet(QUIET).await;

  std::fs::rename(tree.path("incoming.part"), tree.path("final.json")).unwrap();
  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("final.json"));
  assert_eq!(ready.bytes, b"{\"n\":1}".to_vec());
  harness.assert_quiet(QUIET).await;

  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_file_moved_in_from_outside_is_emitted() {
  let tree = TestTree::new();
  let outside = TempDir::new().unwrap();
  let mut harness = WatchHarness::start(tree.watch_config()).await;

  let staged = outside.path().join("moved.json");
  std::fs::write(&staged, "{}").unwrap();
  std::fs::rename(&staged, tree.path("moved.json")).unwrap();

  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("moved.json"));
  harness.assert_quiet(QUIET).await;

  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_directory_moved_into_tree_is_watched() {
  let tree = TestTree::new();
  let outside = TempDir::new().unwrap();
  let mut harness = WatchHarness::start(tree.watch_config()).await;

  let staged = outside.path().join("batch");
  std::fs::create_dir_all(staged.join("inner")).unwrap();
  std::fs::write(staged.join("inner/a.json"), "{}").unwrap();
  std::fs::rename(&staged, tree.path("batch")).unwrap();

  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("batch/inner/a.json"));
  harness.assert_quiet(QUIET).await;

  tree.write("batch/inner/b.json", "{}");
  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("batch/inner/b.json"));

  harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_file_removed_before_settling_is_not_emitted() {
  let tree = TestTree::new();
  let mut harness = WatchHarness::start(tree.watch_config()).await;

  let path = tree.write("transient.json", "{}");
  std::fs::remove_file(&path).unwrap();
  harness.assert_quiet(QUIET).await;

  tree.write("kept.json", "{}");
  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("kept.json"));

  harness.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_path_is_retried_until_it_resolves() {
  use std::os::unix::fs::symlink;

  let tree = TestTree::new();
  let outside = TempDir::new().unwrap();
  let mut harness = WatchHarness::start(tree.watch_config()).await;

  // Both links fail to stat with a loop error, not NotFound
  symlink("loop.json", tree.path("loop.json")).unwrap();
  symlink("loop.json", tree.path("link.json")).unwrap();
  tokio::time::sleep(Duration::from_millis(300)).await;
  assert!(harness.drain().is_empty());

  // No further event touches link.json; only its retry can emit it
  let staged = outside.path().join("loop.json");
  std::fs::write(&staged, "{\"fixed\":true}").unwrap();
  std::fs::rename(&staged, tree.path("loop.json")).unwrap();

  let mut files = vec![harness.next_file().await, harness.next_file().await];
  files.sort_by(|a, b| a.name.cmp(&b.name));
  assert_eq!(files[0].name, "link.json");
  assert_eq!(files[0].bytes, b"{\"fixed\":true}".to_vec());
  assert_eq!(files[1].name, "loop.json");
  harness.assert_quiet(QUIET).await;

  harness.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_path_past_retry_limit_is_dropped() {
  use std::os::unix::fs::symlink;

  let tree = TestTree::new();
  let mut config = tree.watch_config();
  config.max_event_retries = 2;
  config.ignored_patterns = vec![r"\.tmp$".to_string()];
  let mut harness = WatchHarness::start(config).await;

  symlink("stuck.json", tree.path("stuck.json")).unwrap();
  // Three failed attempts a quiet window apart exhaust the limit
  harness.assert_quiet(QUIET).await;

  // Replacing the link with a real file no longer gets through
  tree.write("fix.tmp", "{}");
  std::fs::rename(tree.path("fix.tmp"), tree.path("stuck.json")).unwrap();
  harness.assert_quiet(QUIET).await;
  assert!(tree.path("stuck.json").is_file());

  // Other paths are unaffected
  tree.write("ok.json", "{}");
  let ready = harness.next_file().await;
  assert_eq!(ready.relative, PathBuf::from("ok.json"));

  harness.stop().await.unwrap();
}
