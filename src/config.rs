//! Configuration for opening a [`Deque`](crate::Deque).

use crate::error::{Error, Result};

/// Default size of a block file in bytes.
pub const DEFAULT_TARGET_BLOCK_BYTES: usize = 8 * 1024 * 1024;

/// Configuration for a [`Deque`](crate::Deque).
///
/// All fields have defaults, so a TOML document only needs to name what it changes:
///
/// ```toml
/// block_capacity = 4096
/// namespace = "queue-a"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
  /// Approximate size of one block file. The block capacity is this divided by the record size.
  pub target_block_bytes: usize,

  /// Exact number of records per block, overriding `target_block_bytes`.
  pub block_capacity: Option<usize>,

  /// Token naming the storage namespace inside the root directory. When absent, a token unique
  /// to this process and deque is generated.
  pub namespace: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Config { target_block_bytes: DEFAULT_TARGET_BLOCK_BYTES, block_capacity: None, namespace: None }
  }
}

impl Config {
  /// Parses a configuration from a TOML document.
  pub fn from_toml(text: &str) -> Result<Self> {
    toml::from_str(text).map_err(|err| Error::Config(err.to_string()))
  }

  /// Returns the number of records of `record_size` bytes that one block holds.
  pub fn block_capacity(&self, record_size: usize) -> Result<usize> {
    if record_size == 0 {
      return Err(Error::Config("records must occupy at least one byte".to_owned()));
    }
    let capacity = self.block_capacity.unwrap_or(self.target_block_bytes / record_size);
    if capacity == 0 {
      return Err(Error::Config(format!(
        "a block of {} bytes cannot hold a {record_size}-byte record",
        self.target_block_bytes
      )));
    }
    Ok(capacity)
  }
}
