//! File name filtering.

use regex::RegexSet;

/// Error building a [`PathFilter`]
#[derive(Debug, thiserror::Error)]
#[error("Invalid ignore pattern: {0}")]
pub struct FilterError(#[from] regex::Error);

/// Compiled ignore patterns.
///
/// A file name matching any pattern is excluded. With no patterns every name
/// is accepted.
#[derive(Debug, Clone)]
pub struct PathFilter {
  ignored: RegexSet,
}

impl PathFilter {
  pub fn new<I, S>(patterns: I) -> Result<Self, FilterError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Ok(Self {
      ignored: RegexSet::new(patterns)?,
    })
  }

  /// Whether `name` is eligible for processing
  pub fn accepts(&self, name: &str) -> bool {
    !self.ignored.is_match(name)
  }
}
